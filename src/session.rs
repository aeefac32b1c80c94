use async_trait::async_trait;

/// SessionManager remembers feature states across evaluations, for example for the lifetime of a
/// user's browser session.
///
/// The [crate::FeatureManager] asks its session managers, in registration order, before
/// evaluating a feature without context; the first stored state wins. After a real evaluation
/// the result is handed to every session manager.
///
/// Feature names are passed lower-cased, so every spelling of a name shares one state.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// The stored state of `feature_name`, if any.
    async fn get(&self, feature_name: &str) -> Option<bool>;

    async fn set(&self, feature_name: &str, enabled: bool);
}

