use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::filter::{FilterEvaluationContext, SimpleFeatureFilter};

/// Settings of the [TimeWindowFilter].
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TimeWindowFilterSettings {
    /// First instant at which the feature is enabled. Open if absent.
    #[serde(default, deserialize_with = "timestamp")]
    pub start: Option<DateTime<Utc>>,
    /// First instant at which the feature is no longer enabled. Open if absent.
    #[serde(default, deserialize_with = "timestamp")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindowFilterSettings {
    /// Returns true if `now` is within `[start, end)`.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| now >= start) && self.end.map_or(true, |end| now < end)
    }
}

// Accepts RFC 3339 ("2024-05-01T10:00:00Z") and RFC 2822 ("Wed, 01 May 2024 10:00:00 GMT").
fn timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    let raw = match raw.as_deref().map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| D::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// TimeWindowFilter enables a feature between an optional start and an optional end.
#[derive(Clone)]
pub struct TimeWindowFilter {
    clock: Clock,
}

impl TimeWindowFilter {
    pub const ALIAS: &'static str = "TimeWindow";

    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Uses `clock` instead of the system clock to tell the current time.
    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }
}

impl Default for TimeWindowFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimpleFeatureFilter for TimeWindowFilter {
    fn alias(&self) -> &str {
        Self::ALIAS
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        let settings: TimeWindowFilterSettings = context.settings()?;
        Ok(settings.contains((self.clock)()))
    }
}
