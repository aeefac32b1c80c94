use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::filter::{FilterEvaluationContext, SimpleFeatureFilter};

/// Settings of the [PercentageFilter].
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PercentageFilterSettings {
    /// Chance, between 0 and 100, that an evaluation enables the feature.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub value: f64,
}

/// PercentageFilter enables a feature for a random share of evaluations.
///
/// Each evaluation draws again; use a [crate::FeatureManagerSnapshot] to keep the result stable
/// within a unit of work.
#[derive(Clone, Copy, Debug, Default)]
pub struct PercentageFilter;

impl PercentageFilter {
    pub const ALIAS: &'static str = "Percentage";
}

#[async_trait]
impl SimpleFeatureFilter for PercentageFilter {
    fn alias(&self) -> &str {
        Self::ALIAS
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        let settings: PercentageFilterSettings = context.settings()?;
        if !(0.0..=100.0).contains(&settings.value) {
            return Err(context.invalid(format!(
                "Value must be between 0 and 100, got {}",
                settings.value
            )));
        }

        let draw: f64 = rand::rng().random_range(0.0..100.0);
        Ok(draw < settings.value)
    }
}
