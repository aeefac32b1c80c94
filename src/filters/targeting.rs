use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::context::TargetingContext;
use crate::error::Result;
use crate::filter::{ContextualFeatureFilter, FilterEvaluationContext, SimpleFeatureFilter};
use crate::options::TargetingEvaluationOptions;
use crate::targeting::Audience;

/// Settings of the targeting filters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TargetingFilterSettings {
    #[serde(default)]
    pub audience: Audience,
}

/// ContextualTargetingFilter enables a feature for an [Audience], given the [TargetingContext]
/// supplied for the evaluation.
#[derive(Clone, Debug, Default)]
pub struct ContextualTargetingFilter {
    options: TargetingEvaluationOptions,
}

impl ContextualTargetingFilter {
    pub const ALIAS: &'static str = "Targeting";

    pub fn new(options: TargetingEvaluationOptions) -> Self {
        Self { options }
    }

    fn decide(&self, context: &FilterEvaluationContext<'_>, targeting: &TargetingContext) -> Result<bool> {
        let settings: TargetingFilterSettings = context.settings()?;
        settings
            .audience
            .validate()
            .map_err(|reason| context.invalid(reason))?;

        Ok(settings
            .audience
            .targets(context.feature_name, targeting, self.options.ignore_case))
    }
}

#[async_trait]
impl ContextualFeatureFilter for ContextualTargetingFilter {
    type Context = TargetingContext;

    fn alias(&self) -> &str {
        Self::ALIAS
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        targeting: &TargetingContext,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        self.decide(context, targeting)
    }
}

/// TargetingContextAccessor supplies the ambient [TargetingContext], typically the user behind
/// the current request.
#[async_trait]
pub trait TargetingContextAccessor: Send + Sync {
    async fn targeting_context(&self, cancel: &CancellationToken) -> Result<TargetingContext>;
}

/// TargetingFilter is the simple form of [ContextualTargetingFilter]: rather than requiring a
/// context with each evaluation it asks a [TargetingContextAccessor].
#[derive(Clone)]
pub struct TargetingFilter {
    accessor: Arc<dyn TargetingContextAccessor>,
    inner: ContextualTargetingFilter,
}

impl TargetingFilter {
    pub const ALIAS: &'static str = ContextualTargetingFilter::ALIAS;

    pub fn new(
        accessor: Arc<dyn TargetingContextAccessor>,
        options: TargetingEvaluationOptions,
    ) -> Self {
        Self {
            accessor,
            inner: ContextualTargetingFilter::new(options),
        }
    }
}

#[async_trait]
impl SimpleFeatureFilter for TargetingFilter {
    fn alias(&self) -> &str {
        Self::ALIAS
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let targeting = self.accessor.targeting_context(cancel).await?;
        self.inner.decide(context, &targeting)
    }
}
