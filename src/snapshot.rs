use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use log::debug;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::context::EvaluationContext;
use crate::error::Result;
use crate::manager::{FeatureEvaluator, FeatureManager};
use crate::util::{name_key, require_feature_name, until_cancelled};

type StateKey = (String, EvaluationContext);

/// FeatureManagerSnapshot memoizes feature states for one unit of work, such as a single request.
///
/// The first evaluation of a feature with a given context is delegated to the wrapped evaluator;
/// later ones return the stored state, so every observer within the unit of work sees the same
/// state even for filters that draw randomly or depend on the clock. Concurrent evaluations of
/// the same feature and context share one underlying evaluation. Failed or cancelled
/// evaluations are not stored.
///
/// Create one snapshot per unit of work and drop it when the work is done.
pub struct FeatureManagerSnapshot {
    evaluator: Arc<dyn FeatureEvaluator>,
    states: DashMap<StateKey, Arc<OnceCell<bool>>>,
    names: OnceCell<Vec<String>>,
}

impl FeatureManagerSnapshot {
    pub fn new(evaluator: Arc<dyn FeatureEvaluator>) -> Self {
        Self {
            evaluator,
            states: DashMap::new(),
            names: OnceCell::new(),
        }
    }

    /// Number of feature states stored so far.
    pub fn len(&self) -> usize {
        self.states
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FeatureManager {
    /// Starts a unit of work over this manager.
    pub fn snapshot(self: &Arc<Self>) -> FeatureManagerSnapshot {
        FeatureManagerSnapshot::new(self.clone())
    }
}

#[async_trait]
impl FeatureEvaluator for FeatureManagerSnapshot {
    async fn evaluate(
        &self,
        feature_name: &str,
        context: &EvaluationContext,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        require_feature_name(feature_name)?;

        let key = (name_key(feature_name), context.clone());
        let state = self.states.entry(key).or_default().clone();
        if let Some(enabled) = state.get() {
            debug!("feature {} is {} from snapshot", feature_name, enabled);
            return Ok(*enabled);
        }

        until_cancelled(cancel, async {
            state
                .get_or_try_init(|| self.evaluator.evaluate(feature_name, context, cancel))
                .await
                .copied()
        })
        .await
    }

    fn feature_names<'a>(&'a self, cancel: &'a CancellationToken) -> BoxStream<'a, Result<String>> {
        stream::once(async move {
            self.names
                .get_or_try_init(|| self.evaluator.feature_names(cancel).try_collect())
                .await
                .map(|names| stream::iter(names.iter().cloned().map(Ok)))
        })
        .try_flatten()
        .boxed()
    }
}
