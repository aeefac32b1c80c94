use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::context::EvaluationContext;
use crate::definition::FeatureDefinition;
use crate::error::{Error, Result};
use crate::filter::{FilterEvaluationContext, FilterRegistry};
use crate::options::{FeatureManagementOptions, RequirementType};
use crate::provider::FeatureDefinitionProvider;
use crate::session::SessionManager;
use crate::util::{name_key, require_feature_name, until_cancelled};

/// FeatureEvaluator is the evaluation surface shared by [FeatureManager] and
/// [crate::FeatureManagerSnapshot].
#[async_trait]
pub trait FeatureEvaluator: Send + Sync {
    /// Decides whether the feature named `feature_name` is enabled, given the external
    /// contexts in `context`.
    ///
    /// Fails with [Error::MissingFeature] if no definition exists, with
    /// [Error::MissingFeatureFilter] if the definition references an unregistered filter (unless
    /// [FeatureManagementOptions::ignore_missing_feature_filters] is set), and with
    /// [Error::Cancelled] if `cancel` fires first.
    async fn evaluate(
        &self,
        feature_name: &str,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Names of every known feature, in the order the provider enumerates them.
    fn feature_names<'a>(&'a self, cancel: &'a CancellationToken) -> BoxStream<'a, Result<String>>;

    async fn is_enabled(&self, feature_name: &str) -> Result<bool> {
        self.is_enabled_with(feature_name, &EvaluationContext::new())
            .await
    }

    async fn is_enabled_with(&self, feature_name: &str, context: &EvaluationContext) -> Result<bool> {
        self.evaluate(feature_name, context, &CancellationToken::new())
            .await
    }

    /// Combines the states of several features.
    ///
    /// Features are evaluated in order and evaluation stops as soon as the outcome is known.
    /// Over an empty list, [RequirementType::Any] is false and [RequirementType::All] is true.
    async fn is_enabled_for(
        &self,
        requirement: RequirementType,
        feature_names: &[&str],
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        for feature_name in feature_names {
            let enabled = self.evaluate(feature_name, context, cancel).await?;
            match requirement {
                RequirementType::Any if enabled => return Ok(true),
                RequirementType::All if !enabled => return Ok(false),
                _ => {}
            }
        }
        Ok(requirement == RequirementType::All)
    }

    async fn is_any_enabled(&self, feature_names: &[&str]) -> Result<bool> {
        let cancel = CancellationToken::new();
        self.is_enabled_for(
            RequirementType::Any,
            feature_names,
            &EvaluationContext::new(),
            &cancel,
        )
        .await
    }

    async fn are_all_enabled(&self, feature_names: &[&str]) -> Result<bool> {
        let cancel = CancellationToken::new();
        self.is_enabled_for(
            RequirementType::All,
            feature_names,
            &EvaluationContext::new(),
            &cancel,
        )
        .await
    }
}

/// FeatureManager evaluates features against the definitions of a [FeatureDefinitionProvider]
/// using the filters of a [FilterRegistry].
///
/// A feature is enabled if any of its filter configurations is. Configurations are evaluated in
/// declared order and evaluation stops at the first one that enables the feature.
pub struct FeatureManager {
    provider: Arc<dyn FeatureDefinitionProvider>,
    filters: FilterRegistry,
    options: FeatureManagementOptions,
    session_managers: Vec<Arc<dyn SessionManager>>,
}

impl FeatureManager {
    pub fn new(provider: Arc<dyn FeatureDefinitionProvider>, filters: FilterRegistry) -> Self {
        Self {
            provider,
            filters,
            options: FeatureManagementOptions::default(),
            session_managers: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: FeatureManagementOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a session manager. Session managers are consulted in the order they were added.
    pub fn with_session_manager(mut self, session_manager: Arc<dyn SessionManager>) -> Self {
        self.session_managers.push(session_manager);
        self
    }

    pub fn options(&self) -> &FeatureManagementOptions {
        &self.options
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    async fn session_state(&self, feature_name: &str, cancel: &CancellationToken) -> Result<Option<bool>> {
        for session_manager in &self.session_managers {
            let stored = until_cancelled(cancel, async { Ok(session_manager.get(feature_name).await) }).await?;
            if stored.is_some() {
                return Ok(stored);
            }
        }
        Ok(None)
    }

    async fn store_session_state(
        &self,
        feature_name: &str,
        enabled: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for session_manager in &self.session_managers {
            until_cancelled(cancel, async {
                session_manager.set(feature_name, enabled).await;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    async fn evaluate_definition(
        &self,
        definition: &FeatureDefinition,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        for configuration in &definition.enabled_for {
            if let Some(enabled) = configuration.pseudo_filter() {
                debug!(
                    "feature {} is {} by {}",
                    definition.name,
                    if enabled { "enabled" } else { "disabled" },
                    configuration.name
                );
                return Ok(enabled);
            }

            let filter = match self.filters.resolve(&configuration.name) {
                Some(filter) => filter,
                None if self.options.ignore_missing_feature_filters => {
                    warn!(
                        "feature {} references the unregistered feature filter {}; treating it as not enabling the feature",
                        definition.name, configuration.name
                    );
                    continue;
                }
                None => {
                    return Err(Error::MissingFeatureFilter {
                        feature: definition.name.clone(),
                        filter: configuration.name.clone(),
                    })
                }
            };

            let filter_context = FilterEvaluationContext::new(
                &definition.name,
                &configuration.name,
                &configuration.parameters,
            );
            let outcome = until_cancelled(cancel, async {
                Ok(filter.evaluate(&filter_context, context, cancel).await)
            })
            .await?;

            match outcome {
                None => debug!(
                    "skipping filter {} of feature {}: its context was not supplied",
                    configuration.name, definition.name
                ),
                Some(result) => {
                    if result? {
                        debug!(
                            "feature {} is enabled by {}",
                            definition.name, configuration.name
                        );
                        return Ok(true);
                    }
                }
            }
        }

        debug!("feature {} is disabled", definition.name);
        Ok(false)
    }
}

#[async_trait]
impl FeatureEvaluator for FeatureManager {
    async fn evaluate(
        &self,
        feature_name: &str,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        require_feature_name(feature_name)?;

        // Session states are not keyed by context, so only context-free evaluations use them.
        let use_sessions = context.is_empty() && !self.session_managers.is_empty();
        let session_key = name_key(feature_name);
        if use_sessions {
            if let Some(enabled) = self.session_state(&session_key, cancel).await? {
                debug!("feature {} is {} from session", feature_name, enabled);
                return Ok(enabled);
            }
        }

        let definition = until_cancelled(
            cancel,
            self.provider.feature_definition(feature_name, cancel),
        )
        .await?;
        let enabled = self.evaluate_definition(&definition, context, cancel).await?;

        if use_sessions {
            self.store_session_state(&session_key, enabled, cancel).await?;
        }
        Ok(enabled)
    }

    fn feature_names<'a>(&'a self, cancel: &'a CancellationToken) -> BoxStream<'a, Result<String>> {
        self.provider
            .feature_definitions(cancel)
            .map_ok(|definition| definition.name.clone())
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{
        manager, manager_with, CallbackFilter, ContextualCallbackFilter, CountingFilter,
        MemorySession, PendingFilter,
    };
    use crate::{AccountContext, ErrorKind};
    use spectral::prelude::*;
    use std::time::Duration;
    use test_case::test_case;

    const DEFINITIONS: &str = r#"[
        {"Name": "On", "EnabledFor": [{"Name": "AlwaysOn"}]},
        {"Name": "Off", "EnabledFor": [{"Name": "AlwaysOff"}]},
        {"Name": "Empty"},
        {"Name": "Unregistered", "EnabledFor": [{"Name": "NoSuchFilter"}]},
        {"Name": "FalseThenTrue", "EnabledFor": [{"Name": "False"}, {"Name": "True"}]},
        {"Name": "MissingThenTrue", "EnabledFor": [{"Name": "NoSuchFilter"}, {"Name": "True"}]},
        {"Name": "Accounts", "EnabledFor": [{"Name": "Accounts"}]},
        {"Name": "Pending", "EnabledFor": [{"Name": "Pending"}]}
    ]"#;

    fn registry() -> FilterRegistry {
        FilterRegistry::new()
            .with_simple(CallbackFilter::new("True", |_| true))
            .unwrap()
            .with_simple(CallbackFilter::new("False", |_| false))
            .unwrap()
            .with_simple(PendingFilter)
            .unwrap()
            .with_contextual(ContextualCallbackFilter::new("Accounts", |_, account| {
                account.account_id == "abc"
            }))
            .unwrap()
    }

    fn kind_of(result: Result<bool>) -> std::result::Result<bool, ErrorKind> {
        result.map_err(|e| e.kind())
    }

    #[tokio::test]
    async fn pseudo_filters_decide_immediately() {
        let manager = manager(DEFINITIONS, registry());
        assert_that!(manager.is_enabled("On").await).is_equal_to(Ok(true));
        assert_that!(manager.is_enabled("on").await).is_equal_to(Ok(true));
        assert_that!(manager.is_enabled("Off").await).is_equal_to(Ok(false));
    }

    #[tokio::test]
    async fn feature_without_filters_is_disabled() {
        let manager = manager(DEFINITIONS, registry());
        assert_that!(manager.is_enabled("Empty").await).is_equal_to(Ok(false));
    }

    #[tokio::test]
    async fn unknown_feature_is_missing() {
        let manager = manager(DEFINITIONS, registry());
        assert_that!(kind_of(manager.is_enabled("DoesNotExist").await))
            .is_equal_to(Err(ErrorKind::MissingFeature));
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "blank")]
    fn blank_feature_name_is_rejected(name: &str) {
        let manager = manager(DEFINITIONS, registry());
        let result = futures::executor::block_on(manager.is_enabled(name));
        assert_that!(kind_of(result)).is_equal_to(Err(ErrorKind::ArgumentValidation));
    }

    #[tokio::test]
    async fn unregistered_filter_fails_by_default() {
        let manager = manager(DEFINITIONS, registry());
        let result = manager.is_enabled("Unregistered").await;
        assert_that!(result).is_equal_to(Err(Error::MissingFeatureFilter {
            feature: "Unregistered".into(),
            filter: "NoSuchFilter".into(),
        }));
    }

    #[tokio::test]
    async fn unregistered_filter_can_be_ignored() {
        let manager = manager_with(
            DEFINITIONS,
            registry(),
            FeatureManagementOptions {
                ignore_missing_feature_filters: true,
            },
        );
        assert_that!(manager.is_enabled("Unregistered").await).is_equal_to(Ok(false));
        assert_that!(manager.is_enabled("MissingThenTrue").await).is_equal_to(Ok(true));
    }

    #[tokio::test]
    async fn any_enabling_filter_enables_the_feature() {
        let manager = manager(DEFINITIONS, registry());
        assert_that!(manager.is_enabled("FalseThenTrue").await).is_equal_to(Ok(true));
    }

    #[tokio::test]
    async fn evaluation_stops_at_first_enabling_filter() {
        let counter = CountingFilter::new("Counted", true);
        let registry = FilterRegistry::new()
            .with_simple(CallbackFilter::new("True", |_| true))
            .unwrap()
            .with_simple(counter.clone())
            .unwrap();
        let manager = manager(
            r#"[{"Name": "Beta", "EnabledFor": [{"Name": "True"}, {"Name": "Counted"}]}]"#,
            registry,
        );

        assert_that!(manager.is_enabled("Beta").await).is_equal_to(Ok(true));
        assert_that!(counter.calls()).is_equal_to(0);
    }

    #[tokio::test]
    async fn contextual_filter_needs_its_context() {
        let manager = manager(DEFINITIONS, registry());
        assert_that!(manager.is_enabled("Accounts").await).is_equal_to(Ok(false));

        let abc = EvaluationContext::from(AccountContext::new("abc"));
        assert_that!(manager.is_enabled_with("Accounts", &abc).await).is_equal_to(Ok(true));

        let other = EvaluationContext::from(AccountContext::new("xyz"));
        assert_that!(manager.is_enabled_with("Accounts", &other).await).is_equal_to(Ok(false));
    }

    #[test_case(&["On", "Off"], true, false)]
    #[test_case(&["On", "FalseThenTrue"], true, true)]
    #[test_case(&["Off", "Empty"], false, false)]
    #[test_case(&[], false, true)]
    fn multi_feature_gates(names: &[&str], any: bool, all: bool) {
        let manager = manager(DEFINITIONS, registry());
        futures::executor::block_on(async {
            assert_that!(manager.is_any_enabled(names).await).is_equal_to(Ok(any));
            assert_that!(manager.are_all_enabled(names).await).is_equal_to(Ok(all));
        });
    }

    #[tokio::test]
    async fn gates_surface_errors_they_reach() {
        let manager = manager(DEFINITIONS, registry());
        assert_that!(kind_of(manager.are_all_enabled(&["On", "DoesNotExist"]).await))
            .is_equal_to(Err(ErrorKind::MissingFeature));
        assert_that!(manager.is_any_enabled(&["On", "DoesNotExist"]).await).is_equal_to(Ok(true));
    }

    #[tokio::test]
    async fn cancelled_token_cancels_evaluation() {
        let manager = manager(DEFINITIONS, registry());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager.evaluate("On", &EvaluationContext::new(), &cancel).await;
        assert_that!(result).is_equal_to(Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_suspended_filter() {
        let manager = manager(DEFINITIONS, registry());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = manager.evaluate("Pending", &EvaluationContext::new(), &cancel).await;
        assert_that!(result).is_equal_to(Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn lists_feature_names_in_definition_order() {
        let manager = manager(DEFINITIONS, registry());
        let cancel = CancellationToken::new();
        let names: Vec<String> = manager.feature_names(&cancel).try_collect().await.unwrap();
        assert_that!(names).has_length(8);
        assert_that!(names[0].as_str()).is_equal_to("On");
        assert_that!(names[7].as_str()).is_equal_to("Pending");
    }

    #[tokio::test]
    async fn sessions_override_and_remember_context_free_evaluations() {
        let counter = CountingFilter::new("Counted", true);
        let registry = FilterRegistry::new().with_simple(counter.clone()).unwrap();
        let session = Arc::new(MemorySession::default());
        let manager = manager(
            r#"[
                {"Name": "Beta", "EnabledFor": [{"Name": "Counted"}]},
                {"Name": "Stored", "EnabledFor": [{"Name": "Counted"}]}
            ]"#,
            registry,
        )
        .with_session_manager(session.clone());

        session.set("stored", false).await;
        assert_that!(manager.is_enabled("Stored").await).is_equal_to(Ok(false));
        assert_that!(counter.calls()).is_equal_to(0);

        assert_that!(manager.is_enabled("Beta").await).is_equal_to(Ok(true));
        assert_that!(session.get("beta").await).contains_value(true);
        assert_that!(counter.calls()).is_equal_to(1);

        let with_account = EvaluationContext::from(AccountContext::new("abc"));
        assert_that!(manager.is_enabled_with("Stored", &with_account).await).is_equal_to(Ok(true));
        assert_that!(counter.calls()).is_equal_to(2);
    }

    #[tokio::test]
    async fn session_states_ignore_feature_name_case() {
        let counter = CountingFilter::new("Counted", true);
        let registry = FilterRegistry::new().with_simple(counter.clone()).unwrap();
        let session = Arc::new(MemorySession::default());
        let manager = manager(
            r#"[
                {"Name": "Beta", "EnabledFor": [{"Name": "Counted"}]},
                {"Name": "Gamma", "EnabledFor": [{"Name": "Counted"}]}
            ]"#,
            registry,
        )
        .with_session_manager(session.clone());

        session.set("beta", false).await;
        assert_that!(manager.is_enabled("Beta").await).is_equal_to(Ok(false));
        assert_that!(manager.is_enabled("beta").await).is_equal_to(Ok(false));
        assert_that!(manager.is_enabled("BETA").await).is_equal_to(Ok(false));
        assert_that!(counter.calls()).is_equal_to(0);

        assert_that!(manager.is_enabled("Gamma").await).is_equal_to(Ok(true));
        assert_that!(manager.is_enabled("gAMMA").await).is_equal_to(Ok(true));
        assert_that!(counter.calls()).is_equal_to(1);
        assert_that!(session.get("Gamma").await).is_none();
    }

    #[tokio::test]
    async fn invalid_filter_parameters_are_surfaced() {
        let registry = FilterRegistry::with_builtin_filters(Default::default()).unwrap();
        let manager = manager(
            r#"[{"Name": "Beta", "EnabledFor": [{"Name": "Percentage", "Parameters": {"Value": "lots"}}]}]"#,
            registry,
        );
        assert_that!(kind_of(manager.is_enabled("Beta").await))
            .is_equal_to(Err(ErrorKind::InvalidFilterConfiguration));
    }
}
