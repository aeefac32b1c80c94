//! Filters shipped with the crate.
//!
//! Register them individually, or all at once with [FilterRegistry::with_builtin_filters].

mod account;
mod browser;
mod percentage;
mod targeting;
mod time_window;

pub use account::*;
pub use browser::*;
pub use percentage::*;
pub use targeting::*;
pub use time_window::*;

use crate::error::Result;
use crate::filter::FilterRegistry;
use crate::options::TargetingEvaluationOptions;

impl FilterRegistry {
    /// A registry holding every built-in filter, with the contextual variant of the targeting
    /// filter.
    pub fn with_builtin_filters(targeting: TargetingEvaluationOptions) -> Result<Self> {
        FilterRegistry::new()
            .with_simple(TimeWindowFilter::new())?
            .with_simple(PercentageFilter)?
            .with_contextual(AccountIdFilter)?
            .with_contextual(BrowserFilter)?
            .with_contextual(ContextualTargetingFilter::new(targeting))
    }
}
