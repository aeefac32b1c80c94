use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use itertools::Itertools;
use log::warn;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::definition::{FeatureDefinition, FilterConfiguration};
use crate::error::{Error, Result};
use crate::provider::{FeatureDefinitionProvider, InMemoryProvider};

/// Root section feature definitions are read from.
pub const FEATURE_MANAGEMENT_SECTION: &str = "FeatureManagement";

const ENABLED_FOR: &str = "EnabledFor";
const NAME: &str = "Name";
const PARAMETERS: &str = "Parameters";

/// A node of the configuration tree: a section may have a value, children, or both.
#[derive(Debug, Default)]
struct Section {
    value: Option<String>,
    children: Vec<(String, Section)>,
}

impl Section {
    fn child(&self, key: &str) -> Option<&Section> {
        self.children
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, section)| section)
    }

    /// Creates the section at `path`. A `None` value only declares it.
    fn insert(&mut self, path: &[&str], value: Option<String>) {
        let Some((head, rest)) = path.split_first() else {
            if value.is_some() {
                self.value = value;
            }
            return;
        };

        let position = self
            .children
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(head));
        let index = match position {
            Some(index) => index,
            None => {
                self.children.push((head.to_string(), Section::default()));
                self.children.len() - 1
            }
        };
        self.children[index].1.insert(rest, value);
    }

    /// Children whose keys are array indices, in index order.
    fn indexed(&self) -> Option<Vec<&Section>> {
        let indexed: Option<Vec<(usize, &Section)>> = self
            .children
            .iter()
            .map(|(k, section)| k.parse::<usize>().ok().map(|i| (i, section)))
            .collect();
        indexed.map(|children| {
            children
                .into_iter()
                .sorted_by_key(|(i, _)| *i)
                .map(|(_, section)| section)
                .collect()
        })
    }

    /// Converts the section into the JSON shape filters deserialize their settings from. Sections
    /// whose keys are all integers become arrays; leaf values stay strings.
    fn to_json(&self) -> Value {
        if self.children.is_empty() {
            return self.value.clone().map(Value::String).unwrap_or(Value::Null);
        }
        if let Some(items) = self.indexed() {
            return Value::Array(items.into_iter().map(Section::to_json).collect());
        }
        let mut object = Map::new();
        for (key, section) in &self.children {
            object.insert(key.clone(), section.to_json());
        }
        Value::Object(object)
    }
}

/// ConfigurationProvider reads feature definitions from flat configuration keys under the
/// `FeatureManagement` section, e.g.
///
/// ```text
/// FeatureManagement:Beta:EnabledFor:0:Name = Percentage
/// FeatureManagement:Beta:EnabledFor:0:Parameters:Value = 50
/// FeatureManagement:Legacy = false
/// ```
///
/// Keys are case-insensitive and may use `__` instead of `:` as a separator, so they can come
/// from environment variables. A feature set to `true` is always on; one set to `false` is off.
/// Keys outside the section are ignored.
#[derive(Clone, Debug, Default)]
pub struct ConfigurationProvider {
    definitions: InMemoryProvider,
}

impl ConfigurationProvider {
    /// Builds a provider from key value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::from_entries(
            pairs
                .into_iter()
                .map(|(key, value)| (key.as_ref().to_string(), Some(value.into()))),
        )
    }

    /// Builds a provider from keys that may carry no value. A key without a value declares an
    /// empty section, which is how empty objects, empty arrays and nulls of a settings document
    /// are kept.
    fn from_entries(entries: impl IntoIterator<Item = (String, Option<String>)>) -> Result<Self> {
        let mut root = Section::default();
        for (key, value) in entries {
            let key = key.replace("__", ":");
            let path: Vec<&str> = key.split(':').collect();
            match path.split_first() {
                Some((head, rest)) if head.eq_ignore_ascii_case(FEATURE_MANAGEMENT_SECTION) => {
                    if rest.is_empty() && value.is_none() {
                        continue;
                    }
                    if rest.is_empty() || rest.iter().any(|segment| segment.is_empty()) {
                        warn!("ignoring malformed configuration key {}", key);
                        continue;
                    }
                    root.insert(rest, value);
                }
                _ => continue,
            }
        }

        let definitions = root
            .children
            .iter()
            .filter_map(|(name, section)| read_definition(name, section))
            .collect::<Vec<_>>();
        Ok(Self {
            definitions: InMemoryProvider::new(definitions)?,
        })
    }

    /// Builds a provider from a JSON document shaped like an application settings file, with
    /// feature definitions under a top-level `FeatureManagement` object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(json)
            .map_err(|e| Error::Provider(format!("invalid configuration document: {}", e)))?;
        let mut entries = Vec::new();
        flatten(&mut Vec::new(), &document, &mut entries);
        Self::from_entries(entries)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn read_definition(name: &str, section: &Section) -> Option<FeatureDefinition> {
    if section.children.is_empty() {
        // Declared without a value or filters: configured, but off.
        let Some(value) = section.value.as_deref().map(str::trim) else {
            return Some(FeatureDefinition::new(name));
        };
        return if value.eq_ignore_ascii_case("true") {
            Some(FeatureDefinition::always_on(name))
        } else if value.eq_ignore_ascii_case("false") {
            Some(FeatureDefinition::new(name))
        } else {
            warn!("ignoring feature {}: '{}' is not a boolean", name, value);
            None
        };
    }

    let mut definition = FeatureDefinition::new(name);
    let filters = section
        .child(ENABLED_FOR)
        .map(|enabled_for| enabled_for.indexed().unwrap_or_default())
        .unwrap_or_default();
    for (index, filter) in filters.into_iter().enumerate() {
        match filter.child(NAME).and_then(|n| n.value.as_deref()) {
            Some(alias) if !alias.trim().is_empty() => {
                let parameters = filter
                    .child(PARAMETERS)
                    .map(Section::to_json)
                    .unwrap_or(Value::Null);
                definition = definition.with_filter(FilterConfiguration::with_parameters(
                    alias.trim(),
                    parameters,
                ));
            }
            _ => warn!(
                "ignoring filter {} of feature {}: it has no name",
                index, name
            ),
        }
    }
    Some(definition)
}

fn flatten(path: &mut Vec<String>, value: &Value, entries: &mut Vec<(String, Option<String>)>) {
    match value {
        Value::Object(object) if !object.is_empty() => {
            for (key, child) in object {
                path.push(key.clone());
                flatten(path, child, entries);
                path.pop();
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                flatten(path, child, entries);
                path.pop();
            }
        }
        Value::Object(_) | Value::Array(_) | Value::Null => entries.push((path.iter().join(":"), None)),
        Value::String(s) => entries.push((path.iter().join(":"), Some(s.clone()))),
        scalar => entries.push((path.iter().join(":"), Some(scalar.to_string()))),
    }
}

#[async_trait]
impl FeatureDefinitionProvider for ConfigurationProvider {
    async fn feature_definition(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<FeatureDefinition>> {
        self.definitions.feature_definition(name, cancel).await
    }

    fn feature_definitions<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<Arc<FeatureDefinition>>> {
        self.definitions.feature_definitions(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use futures::TryStreamExt;
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;

    async fn definition(provider: &ConfigurationProvider, name: &str) -> Arc<FeatureDefinition> {
        provider
            .feature_definition(name, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reads_flat_keys() {
        let provider = ConfigurationProvider::from_pairs(vec![
            ("FeatureManagement:Beta:EnabledFor:0:Name", "Percentage"),
            ("FeatureManagement:Beta:EnabledFor:0:Parameters:Value", "50"),
            ("featuremanagement__beta__enabledfor__1__name", "TimeWindow"),
            ("FeatureManagement:Beta:EnabledFor:1:Parameters:End", "2030-01-01T00:00:00Z"),
            ("Logging:LogLevel:Default", "Information"),
        ])
        .unwrap();

        assert_that!(provider.len()).is_equal_to(1);
        let beta = definition(&provider, "BETA").await;
        assert_that!(beta.name.as_str()).is_equal_to("Beta");
        assert_that!(beta.enabled_for).has_length(2);
        assert_that!(beta.enabled_for[0].name.as_str()).is_equal_to("Percentage");
        assert_json_eq!(beta.enabled_for[0].parameters, json!({"Value": "50"}));
        assert_that!(beta.enabled_for[1].name.as_str()).is_equal_to("TimeWindow");
    }

    #[tokio::test]
    async fn boolean_shorthand() {
        let provider = ConfigurationProvider::from_pairs(hashmap! {
            "FeatureManagement:On" => "True",
            "FeatureManagement:Off" => "false",
            "FeatureManagement:Broken" => "maybe",
        })
        .unwrap();

        assert_that!(provider.len()).is_equal_to(2);
        assert_that!(*definition(&provider, "On").await)
            .is_equal_to(FeatureDefinition::always_on("On"));
        assert_that!(definition(&provider, "Off").await.enabled_for).is_empty();
    }

    #[tokio::test]
    async fn integer_keyed_sections_become_arrays() {
        let provider = ConfigurationProvider::from_pairs(vec![
            ("FeatureManagement:Beta:EnabledFor:0:Name", "Targeting"),
            ("FeatureManagement:Beta:EnabledFor:0:Parameters:Audience:Users:1", "Alicia"),
            ("FeatureManagement:Beta:EnabledFor:0:Parameters:Audience:Users:0", "Jeff"),
            ("FeatureManagement:Beta:EnabledFor:0:Parameters:Audience:Groups:0:Name", "Ring0"),
            (
                "FeatureManagement:Beta:EnabledFor:0:Parameters:Audience:Groups:0:RolloutPercentage",
                "100",
            ),
            (
                "FeatureManagement:Beta:EnabledFor:0:Parameters:Audience:DefaultRolloutPercentage",
                "0",
            ),
        ])
        .unwrap();

        let beta = definition(&provider, "Beta").await;
        assert_json_eq!(
            beta.enabled_for[0].parameters,
            json!({
                "Audience": {
                    "Users": ["Jeff", "Alicia"],
                    "Groups": [{"Name": "Ring0", "RolloutPercentage": "100"}],
                    "DefaultRolloutPercentage": "0"
                }
            })
        );
    }

    #[tokio::test]
    async fn reads_settings_documents() {
        let provider = ConfigurationProvider::from_json_str(
            r#"{
                "Logging": {"LogLevel": {"Default": "Warning"}},
                "FeatureManagement": {
                    "Home": true,
                    "Beta": {
                        "EnabledFor": [
                            {"Name": "AlwaysOff"},
                            {"Name": "Percentage", "Parameters": {"Value": 25}}
                        ]
                    },
                    "Legacy": false
                }
            }"#,
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let names: Vec<String> = provider
            .feature_definitions(&cancel)
            .map_ok(|d| d.name.clone())
            .try_collect()
            .await
            .unwrap();
        assert_that!(names).has_length(3);

        let beta = definition(&provider, "Beta").await;
        assert_that!(beta.enabled_for[0].name.as_str()).is_equal_to("AlwaysOff");
        assert_json_eq!(beta.enabled_for[1].parameters, json!({"Value": "25"}));
    }

    #[tokio::test]
    async fn empty_declarations_are_configured_off() {
        let provider = ConfigurationProvider::from_json_str(
            r#"{"FeatureManagement": {"Legacy": {"EnabledFor": []}, "Empty": {}, "Nulled": null}}"#,
        )
        .unwrap();

        assert_that!(provider.len()).is_equal_to(3);
        for name in ["Legacy", "Empty", "Nulled"] {
            let declared = definition(&provider, name).await;
            assert_that!(declared.name.as_str()).is_equal_to(name);
            assert_that!(declared.enabled_for).is_empty();
        }

        let missing = provider
            .feature_definition("Absent", &CancellationToken::new())
            .await
            .map_err(|e| e.kind());
        assert_that!(missing).is_equal_to(Err(crate::ErrorKind::MissingFeature));
    }

    #[test]
    fn empty_feature_management_section_has_no_features() {
        let provider = ConfigurationProvider::from_json_str(r#"{"FeatureManagement": {}}"#).unwrap();
        assert_that!(provider.is_empty()).is_true();
    }

    #[test]
    fn unparseable_document_is_a_provider_error() {
        let result = ConfigurationProvider::from_json_str("{");
        assert_that!(result.map(|p| p.len()).map_err(|e| e.kind()))
            .is_equal_to(Err(crate::ErrorKind::Provider));
    }

    #[tokio::test]
    async fn nameless_filters_are_skipped() {
        let provider = ConfigurationProvider::from_pairs(vec![
            ("FeatureManagement:Beta:EnabledFor:0:Parameters:Value", "10"),
            ("FeatureManagement:Beta:EnabledFor:1:Name", "AlwaysOn"),
        ])
        .unwrap();
        let beta = definition(&provider, "Beta").await;
        assert_that!(beta.enabled_for).has_length(1);
    }
}
