#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::context::{AccountContext, TargetingContext};
use crate::definition::FeatureDefinition;
use crate::error::Result;
use crate::filter::{ContextualFeatureFilter, FilterEvaluationContext, FilterRegistry, SimpleFeatureFilter};
use crate::filters::TargetingContextAccessor;
use crate::manager::FeatureManager;
use crate::options::FeatureManagementOptions;
use crate::provider::InMemoryProvider;
use crate::record::{FeatureRecord, FeatureRecordSource};
use crate::session::SessionManager;

pub fn manager(definitions: &str, filters: FilterRegistry) -> FeatureManager {
    manager_with(definitions, filters, FeatureManagementOptions::default())
}

pub fn manager_with(
    definitions: &str,
    filters: FilterRegistry,
    options: FeatureManagementOptions,
) -> FeatureManager {
    let definitions: Vec<FeatureDefinition> = serde_json::from_str(definitions).unwrap();
    let provider = InMemoryProvider::new(definitions).unwrap();
    FeatureManager::new(Arc::new(provider), filters).with_options(options)
}

type Callback = Box<dyn Fn(&FilterEvaluationContext<'_>) -> bool + Send + Sync>;

pub struct CallbackFilter {
    alias: String,
    callback: Callback,
}

impl CallbackFilter {
    pub fn new(
        alias: &str,
        callback: impl Fn(&FilterEvaluationContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            alias: alias.to_string(),
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl SimpleFeatureFilter for CallbackFilter {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        Ok((self.callback)(context))
    }
}

type AccountCallback = Box<dyn Fn(&FilterEvaluationContext<'_>, &AccountContext) -> bool + Send + Sync>;

pub struct ContextualCallbackFilter {
    alias: String,
    callback: AccountCallback,
}

impl ContextualCallbackFilter {
    pub fn new(
        alias: &str,
        callback: impl Fn(&FilterEvaluationContext<'_>, &AccountContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            alias: alias.to_string(),
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl ContextualFeatureFilter for ContextualCallbackFilter {
    type Context = AccountContext;

    fn alias(&self) -> &str {
        &self.alias
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        account: &AccountContext,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        Ok((self.callback)(context, account))
    }
}

/// Returns a fixed result and counts how often it was evaluated. It yields once per evaluation
/// so concurrent evaluations interleave.
#[derive(Clone)]
pub struct CountingFilter {
    alias: String,
    result: bool,
    calls: Arc<AtomicUsize>,
}

impl CountingFilter {
    pub fn new(alias: &str, result: bool) -> Self {
        Self {
            alias: alias.to_string(),
            result,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimpleFeatureFilter for CountingFilter {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn evaluate(
        &self,
        _context: &FilterEvaluationContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.result)
    }
}

/// Never completes.
pub struct PendingFilter;

#[async_trait]
impl SimpleFeatureFilter for PendingFilter {
    fn alias(&self) -> &str {
        "Pending"
    }

    async fn evaluate(
        &self,
        _context: &FilterEvaluationContext<'_>,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct MemorySession {
    states: DashMap<String, bool>,
}

#[async_trait]
impl SessionManager for MemorySession {
    async fn get(&self, feature_name: &str) -> Option<bool> {
        self.states.get(feature_name).map(|state| *state)
    }

    async fn set(&self, feature_name: &str, enabled: bool) {
        self.states.insert(feature_name.to_string(), enabled);
    }
}

pub struct FixedTargetingAccessor(pub TargetingContext);

#[async_trait]
impl TargetingContextAccessor for FixedTargetingAccessor {
    async fn targeting_context(&self, _cancel: &CancellationToken) -> Result<TargetingContext> {
        Ok(self.0.clone())
    }
}

pub struct MemoryRecordSource {
    records: Vec<FeatureRecord>,
    lookups: AtomicUsize,
}

impl MemoryRecordSource {
    pub fn new(records: Vec<FeatureRecord>) -> Self {
        Self {
            records,
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of single-record lookups served so far. Lookups yield once, so concurrent ones
    /// interleave.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureRecordSource for MemoryRecordSource {
    async fn feature_by_name(
        &self,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<FeatureRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self
            .records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn all_features(&self, _cancel: &CancellationToken) -> Result<Vec<FeatureRecord>> {
        Ok(self.records.clone())
    }
}

/// Targeting definitions used by the end-to-end evaluation tests.
pub const TARGETING_DEFINITIONS: &str = r#"[
    {
        "Name": "Beta",
        "EnabledFor": [{
            "Name": "Targeting",
            "Parameters": {
                "Audience": {
                    "Users": ["Jeff", "Alicia"],
                    "Groups": [
                        {"Name": "Ring0", "RolloutPercentage": 100},
                        {"Name": "Ring1", "RolloutPercentage": 50}
                    ],
                    "DefaultRolloutPercentage": 20
                }
            }
        }]
    },
    {
        "Name": "Closed",
        "EnabledFor": [{"Name": "Targeting", "Parameters": {"Audience": {"DefaultRolloutPercentage": 0}}}]
    }
]"#;
