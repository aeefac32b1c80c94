use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use tokio_util::sync::CancellationToken;

use crate::context::HttpContext;
use crate::error::Result;
use crate::filter::{ContextualFeatureFilter, FilterEvaluationContext};

/// Browser is a browser family the [BrowserFilter] can recognize from a user agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Browser {
    Chrome,
    Edge,
    InternetExplorer,
    Firefox,
}

impl Browser {
    pub const ALL: [Browser; 4] = [
        Browser::Chrome,
        Browser::Edge,
        Browser::InternetExplorer,
        Browser::Firefox,
    ];

    /// Returns true if `user_agent` looks like it was sent by this browser.
    ///
    /// Chrome and Edge exclude each other: a user agent mentioning both is neither.
    pub fn matches(&self, user_agent: &str) -> bool {
        if user_agent.trim().is_empty() {
            return false;
        }
        let user_agent = user_agent.to_lowercase();
        let chrome = user_agent.contains("chrome");
        let edge = user_agent.contains("edge");
        match self {
            Browser::Chrome => chrome && !edge,
            Browser::Edge => edge && !chrome,
            Browser::InternetExplorer => user_agent.contains("trident"),
            Browser::Firefox => user_agent.contains("firefox"),
        }
    }

    /// The first browser whose signature matches `user_agent`.
    pub fn detect(user_agent: &str) -> Option<Browser> {
        Browser::ALL.into_iter().find(|b| b.matches(user_agent))
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Browser::Chrome => "Chrome",
            Browser::Edge => "Edge",
            Browser::InternetExplorer => "InternetExplorer",
            Browser::Firefox => "Firefox",
        };
        f.write_str(name)
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Browser::ALL
            .into_iter()
            .find(|b| b.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown browser '{}'", s))
    }
}

/// Settings of the [BrowserFilter].
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct BrowserFilterSettings {
    #[serde_as(as = "Vec<DisplayFromStr>")]
    #[serde(default)]
    pub allowed_browsers: Vec<Browser>,
}

/// BrowserFilter enables a feature for requests sent by an allow-list of browsers.
///
/// It is only invoked when an [HttpContext] was supplied for the evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserFilter;

impl BrowserFilter {
    pub const ALIAS: &'static str = "Browser";
}

#[async_trait]
impl ContextualFeatureFilter for BrowserFilter {
    type Context = HttpContext;

    fn alias(&self) -> &str {
        Self::ALIAS
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        http: &HttpContext,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        let settings: BrowserFilterSettings = context.settings()?;
        let user_agent = http.user_agent.as_deref().unwrap_or_default();
        Ok(settings
            .allowed_browsers
            .iter()
            .any(|browser| browser.matches(user_agent)))
    }
}
