use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::definition::FeatureDefinition;
use crate::error::{Error, Result};
use crate::util::{name_key, require_feature_name};

/// FeatureDefinitionProvider is the source of [FeatureDefinition]s consulted by the
/// [crate::FeatureManager].
///
/// Implementations may fetch definitions from configuration, a database, or a remote service,
/// and may cache them. Lookups are case-insensitive. A provider that caches must tolerate
/// concurrent lookups of the same, not yet cached, feature.
#[async_trait]
pub trait FeatureDefinitionProvider: Send + Sync {
    /// Retrieve the definition of the feature named `name`, or fail with
    /// [Error::MissingFeature].
    async fn feature_definition(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<FeatureDefinition>>;

    /// Enumerate every known definition. Each call starts a fresh enumeration.
    fn feature_definitions<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<Arc<FeatureDefinition>>>;
}

/// InMemoryProvider holds a fixed set of definitions.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProvider {
    definitions: Vec<Arc<FeatureDefinition>>,
    index: HashMap<String, usize>,
}

impl InMemoryProvider {
    /// Builds a provider from `definitions`, preserving their order for enumeration.
    ///
    /// Fails with [Error::ArgumentValidation] if a definition has an empty name or two
    /// definitions share a name.
    pub fn new(definitions: impl IntoIterator<Item = FeatureDefinition>) -> Result<Self> {
        let mut provider = InMemoryProvider::default();
        for definition in definitions {
            require_feature_name(&definition.name)?;
            let key = name_key(&definition.name);
            if provider.index.contains_key(&key) {
                return Err(Error::ArgumentValidation(format!(
                    "feature '{}' is defined more than once",
                    definition.name
                )));
            }
            provider.index.insert(key, provider.definitions.len());
            provider.definitions.push(Arc::new(definition));
        }
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[async_trait]
impl FeatureDefinitionProvider for InMemoryProvider {
    async fn feature_definition(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<FeatureDefinition>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.index
            .get(&name_key(name))
            .map(|i| self.definitions[*i].clone())
            .ok_or_else(|| Error::MissingFeature {
                feature: name.to_string(),
            })
    }

    fn feature_definitions<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<Arc<FeatureDefinition>>> {
        stream::iter(self.definitions.iter())
            .map(move |definition| {
                if cancel.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    Ok(definition.clone())
                }
            })
            .boxed()
    }
}
