use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::context::{AccountContext, EvaluationContext, HttpContext, TargetingContext};
use crate::error::{Error, Result};
use crate::util::name_key;

/// FilterEvaluationContext tells a filter which feature it is evaluating and with which
/// parameters.
#[derive(Clone, Copy, Debug)]
pub struct FilterEvaluationContext<'a> {
    /// The name of the feature being evaluated.
    pub feature_name: &'a str,
    /// The alias the filter was resolved by.
    pub filter_alias: &'a str,
    /// The raw parameters from the feature's filter configuration.
    pub parameters: &'a serde_json::Value,
}

impl<'a> FilterEvaluationContext<'a> {
    pub fn new(
        feature_name: &'a str,
        filter_alias: &'a str,
        parameters: &'a serde_json::Value,
    ) -> Self {
        Self {
            feature_name,
            filter_alias,
            parameters,
        }
    }

    /// Interprets the parameters as the filter's settings type.
    ///
    /// Absent parameters are read as an empty object, so settings whose fields all have
    /// defaults can be left out of the configuration. Anything that cannot be read fails with
    /// [Error::InvalidFilterConfiguration].
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T> {
        let result = match self.parameters {
            serde_json::Value::Null => T::deserialize(&serde_json::json!({})),
            parameters => T::deserialize(parameters),
        };
        result.map_err(|e| self.invalid(e))
    }

    /// Builds an [Error::InvalidFilterConfiguration] for this filter.
    pub fn invalid(&self, reason: impl ToString) -> Error {
        Error::invalid_configuration(self.feature_name, self.filter_alias, reason)
    }
}

/// A filter that needs nothing but its own settings to decide whether a feature is enabled.
#[async_trait]
pub trait SimpleFeatureFilter: Send + Sync {
    /// The alias feature definitions refer to this filter by.
    fn alias(&self) -> &str;

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// A type of external context that contextual filters can require.
pub trait AppContext: Send + Sync + 'static {
    /// Picks this context out of the contexts supplied for an evaluation.
    fn select(context: &EvaluationContext) -> Option<&Self>;
}

impl AppContext for TargetingContext {
    fn select(context: &EvaluationContext) -> Option<&Self> {
        context.targeting()
    }
}

impl AppContext for AccountContext {
    fn select(context: &EvaluationContext) -> Option<&Self> {
        context.account()
    }
}

impl AppContext for HttpContext {
    fn select(context: &EvaluationContext) -> Option<&Self> {
        context.http()
    }
}

/// A filter that additionally requires an external context of type [Self::Context].
///
/// The engine only invokes a contextual filter when a context of the required type was supplied
/// for the evaluation; otherwise the filter configuration does not enable the feature.
#[async_trait]
pub trait ContextualFeatureFilter: Send + Sync {
    type Context: AppContext;

    fn alias(&self) -> &str;

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        app_context: &Self::Context,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Object-safe view of a [ContextualFeatureFilter] with its context type erased.
#[async_trait]
pub trait ContextualFilterDispatch: Send + Sync {
    fn alias(&self) -> &str;

    /// Name of the context type the filter requires.
    fn context_type(&self) -> &'static str;

    /// Returns None if no compatible context is present in `evaluation_context`.
    async fn evaluate_with(
        &self,
        context: &FilterEvaluationContext<'_>,
        evaluation_context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Option<Result<bool>>;
}

struct ContextualAdapter<F>(F);

#[async_trait]
impl<F: ContextualFeatureFilter> ContextualFilterDispatch for ContextualAdapter<F> {
    fn alias(&self) -> &str {
        self.0.alias()
    }

    fn context_type(&self) -> &'static str {
        std::any::type_name::<F::Context>()
    }

    async fn evaluate_with(
        &self,
        context: &FilterEvaluationContext<'_>,
        evaluation_context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Option<Result<bool>> {
        let app_context = F::Context::select(evaluation_context)?;
        Some(self.0.evaluate(context, app_context, cancel).await)
    }
}

/// FeatureFilter is a registered filter, either simple or contextual.
#[derive(Clone)]
pub enum FeatureFilter {
    Simple(Arc<dyn SimpleFeatureFilter>),
    Contextual(Arc<dyn ContextualFilterDispatch>),
}

impl FeatureFilter {
    pub fn simple<F: SimpleFeatureFilter + 'static>(filter: F) -> Self {
        FeatureFilter::Simple(Arc::new(filter))
    }

    pub fn contextual<F: ContextualFeatureFilter + 'static>(filter: F) -> Self {
        FeatureFilter::Contextual(Arc::new(ContextualAdapter(filter)))
    }

    pub fn alias(&self) -> &str {
        match self {
            FeatureFilter::Simple(f) => f.alias(),
            FeatureFilter::Contextual(f) => f.alias(),
        }
    }

    pub fn is_contextual(&self) -> bool {
        matches!(self, FeatureFilter::Contextual(_))
    }

    /// Evaluates the filter. Returns None if the filter is contextual and its context is absent.
    pub(crate) async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        evaluation_context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Option<Result<bool>> {
        match self {
            FeatureFilter::Simple(f) => Some(f.evaluate(context, cancel).await),
            FeatureFilter::Contextual(f) => {
                f.evaluate_with(context, evaluation_context, cancel).await
            }
        }
    }
}

impl fmt::Debug for FeatureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureFilter::Simple(filter) => f.debug_tuple("Simple").field(&filter.alias()).finish(),
            FeatureFilter::Contextual(filter) => f
                .debug_struct("Contextual")
                .field("alias", &filter.alias())
                .field("context", &filter.context_type())
                .finish(),
        }
    }
}

/// FilterRegistry maps aliases to the filters the host application has registered.
///
/// Aliases are matched case-insensitively and must be unique.
#[derive(Clone, Debug, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, FeatureFilter>,
    aliases: Vec<String>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `filter` under its alias, failing with [Error::DuplicateFeatureFilter] if the
    /// alias is taken.
    pub fn register(&mut self, filter: FeatureFilter) -> Result<()> {
        let key = name_key(filter.alias());
        if self.filters.contains_key(&key) {
            return Err(Error::DuplicateFeatureFilter(filter.alias().to_string()));
        }
        self.aliases.push(filter.alias().to_string());
        self.filters.insert(key, filter);
        Ok(())
    }

    pub fn with_filter(mut self, filter: FeatureFilter) -> Result<Self> {
        self.register(filter)?;
        Ok(self)
    }

    pub fn with_simple<F: SimpleFeatureFilter + 'static>(self, filter: F) -> Result<Self> {
        self.with_filter(FeatureFilter::simple(filter))
    }

    pub fn with_contextual<F: ContextualFeatureFilter + 'static>(self, filter: F) -> Result<Self> {
        self.with_filter(FeatureFilter::contextual(filter))
    }

    /// Looks up the filter registered under `alias`.
    pub fn resolve(&self, alias: &str) -> Option<&FeatureFilter> {
        self.filters.get(&name_key(alias))
    }

    /// Registered aliases, in registration order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
