use serde::{Deserialize, Serialize};

/// Alias of the pseudo-filter that turns a feature on without consulting any registered filter.
pub const ALWAYS_ON: &str = "AlwaysOn";
/// Alias of the pseudo-filter that turns a feature off without consulting any registered filter.
pub const ALWAYS_OFF: &str = "AlwaysOff";

/// FeatureDefinition describes when a feature is enabled.
///
/// A feature is enabled if any of its [FilterConfiguration]s evaluates to true. A definition
/// with no filter configurations is disabled.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureDefinition {
    pub name: String,
    #[serde(default)]
    pub enabled_for: Vec<FilterConfiguration>,
}

/// FilterConfiguration names a filter and the parameters it should be evaluated with.
///
/// The parameters are opaque to everything but the filter registered under [Self::name].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterConfiguration {
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl FeatureDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled_for: Vec::new(),
        }
    }

    /// A definition that is always enabled.
    pub fn always_on(name: impl Into<String>) -> Self {
        Self::new(name).with_filter(FilterConfiguration::new(ALWAYS_ON))
    }

    /// A definition that is always disabled.
    pub fn always_off(name: impl Into<String>) -> Self {
        Self::new(name).with_filter(FilterConfiguration::new(ALWAYS_OFF))
    }

    /// Appends a filter configuration.
    pub fn with_filter(mut self, filter: FilterConfiguration) -> Self {
        self.enabled_for.push(filter);
        self
    }

    /// Returns true if `name` refers to this feature. Feature names are case-insensitive.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl FilterConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    pub(crate) fn pseudo_filter(&self) -> Option<bool> {
        if self.name.eq_ignore_ascii_case(ALWAYS_ON) {
            Some(true)
        } else if self.name.eq_ignore_ascii_case(ALWAYS_OFF) {
            Some(false)
        } else {
            None
        }
    }
}
