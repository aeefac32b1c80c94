use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::{serde_as, DisplayFromStr};
use tokio_util::sync::CancellationToken;

use crate::definition::{FeatureDefinition, FilterConfiguration, ALWAYS_OFF, ALWAYS_ON};
use crate::error::{Error, Result};
use crate::filters::{Browser, BrowserFilter, PercentageFilter, TargetingFilter, TimeWindowFilter};
use crate::provider::FeatureDefinitionProvider;
use crate::util::{name_key, require_feature_name, until_cancelled};

/// FeatureRecord is a feature as it is stored and edited, as opposed to the [FeatureDefinition]
/// the engine evaluates.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub always_on: bool,
    #[serde(default)]
    pub always_off: bool,
    #[serde(default)]
    pub time_window: Option<TimeWindowRecord>,
    #[serde(default)]
    pub rollout_percentage: Option<RolloutPercentageRecord>,
    #[serde(default)]
    pub audience: Option<AudienceRecord>,
    #[serde(default)]
    pub browser_restrictions: Vec<BrowserRestrictionRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindowRecord {
    pub is_active: bool,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPercentageRecord {
    pub is_active: bool,
    pub percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceRecord {
    pub is_active: bool,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub group_rollouts: Vec<GroupRolloutRecord>,
    #[serde(default)]
    pub default_rollout_percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRolloutRecord {
    pub name: String,
    pub rollout_percentage: f64,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserRestrictionRecord {
    pub is_active: bool,
    #[serde_as(as = "DisplayFromStr")]
    pub browser: Browser,
}

impl From<&FeatureRecord> for FeatureDefinition {
    /// A record that is always on, always off, or disabled maps onto a single pseudo-filter.
    /// Otherwise every active part of the record contributes one filter configuration, in the
    /// order time window, rollout percentage, audience, browsers.
    fn from(record: &FeatureRecord) -> Self {
        let definition = FeatureDefinition::new(record.name.clone());
        if record.always_on {
            return definition.with_filter(FilterConfiguration::new(ALWAYS_ON));
        }
        if record.always_off || !record.is_enabled {
            return definition.with_filter(FilterConfiguration::new(ALWAYS_OFF));
        }

        let mut enabled_for = Vec::new();
        if let Some(window) = record.time_window.as_ref().filter(|w| w.is_active) {
            enabled_for.push(FilterConfiguration::with_parameters(
                TimeWindowFilter::ALIAS,
                json!({
                    "Start": window.start.map(|t| t.to_rfc3339()),
                    "End": window.end.map(|t| t.to_rfc3339()),
                }),
            ));
        }
        if let Some(rollout) = record.rollout_percentage.as_ref().filter(|r| r.is_active) {
            enabled_for.push(FilterConfiguration::with_parameters(
                PercentageFilter::ALIAS,
                json!({"Value": rollout.percentage}),
            ));
        }
        if let Some(audience) = record.audience.as_ref().filter(|a| a.is_active) {
            let groups: Vec<_> = audience
                .group_rollouts
                .iter()
                .map(|g| json!({"Name": g.name, "RolloutPercentage": g.rollout_percentage}))
                .collect();
            enabled_for.push(FilterConfiguration::with_parameters(
                TargetingFilter::ALIAS,
                json!({
                    "Audience": {
                        "Users": audience.users,
                        "Groups": groups,
                        "DefaultRolloutPercentage": audience.default_rollout_percentage,
                    }
                }),
            ));
        }
        let browsers: Vec<String> = record
            .browser_restrictions
            .iter()
            .filter(|b| b.is_active)
            .map(|b| b.browser.to_string())
            .collect();
        if !browsers.is_empty() {
            enabled_for.push(FilterConfiguration::with_parameters(
                BrowserFilter::ALIAS,
                json!({"AllowedBrowsers": browsers}),
            ));
        }

        FeatureDefinition {
            enabled_for,
            ..definition
        }
    }
}

/// FeatureRecordSource is the store feature records are kept in, such as a database table or
/// the API of a feature administration service.
#[async_trait]
pub trait FeatureRecordSource: Send + Sync {
    /// The record named `name`, matched case-insensitively, or None if there is none.
    async fn feature_by_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<FeatureRecord>>;

    async fn all_features(&self, cancel: &CancellationToken) -> Result<Vec<FeatureRecord>>;
}

/// RecordProvider serves definitions derived from a [FeatureRecordSource] and keeps them until
/// they are invalidated.
pub struct RecordProvider<S> {
    source: S,
    definitions: DashMap<String, Arc<FeatureDefinition>>,
}

impl<S: FeatureRecordSource> RecordProvider<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            definitions: DashMap::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Forgets the cached definition of `name`, so the next lookup reads the source again.
    pub fn invalidate(&self, name: &str) {
        self.definitions.remove(&name_key(name));
    }

    /// Forgets every cached definition.
    pub fn clear(&self) {
        self.definitions.clear();
    }

    // The first definition stored for a name wins when lookups race.
    fn cache(&self, record: &FeatureRecord) -> Arc<FeatureDefinition> {
        self.definitions
            .entry(name_key(&record.name))
            .or_insert_with(|| Arc::new(FeatureDefinition::from(record)))
            .clone()
    }
}

#[async_trait]
impl<S: FeatureRecordSource> FeatureDefinitionProvider for RecordProvider<S> {
    async fn feature_definition(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<FeatureDefinition>> {
        require_feature_name(name)?;
        if let Some(definition) = self.definitions.get(&name_key(name)) {
            return Ok(definition.clone());
        }

        debug!("reading feature {} from the record source", name);
        let record = until_cancelled(cancel, self.source.feature_by_name(name, cancel))
            .await?
            .ok_or_else(|| Error::MissingFeature {
                feature: name.to_string(),
            })?;
        Ok(self.cache(&record))
    }

    fn feature_definitions<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<Arc<FeatureDefinition>>> {
        stream::once(until_cancelled(cancel, self.source.all_features(cancel)))
            .map_ok(|records| stream::iter(records.into_iter().map(Ok)))
            .try_flatten()
            .map_ok(move |record| self.cache(&record))
            .boxed()
    }
}
