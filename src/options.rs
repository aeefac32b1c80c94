use serde::Deserialize;

/// Options that control how the [crate::FeatureManager] treats configuration problems.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct FeatureManagementOptions {
    /// When set, a filter alias with no registered filter makes that filter configuration
    /// contribute false instead of failing with [crate::Error::MissingFeatureFilter].
    pub ignore_missing_feature_filters: bool,
}

/// Options for the targeting filters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TargetingEvaluationOptions {
    /// Compare user ids and group names without regard to ASCII case.
    pub ignore_case: bool,
}

/// RequirementType decides how the results of several features are combined.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum RequirementType {
    /// At least one of the features must be enabled.
    #[default]
    Any,
    /// Every feature must be enabled.
    All,
}
