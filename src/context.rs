use serde::{Deserialize, Serialize};

/// TargetingContext identifies who a feature is being evaluated for.
///
/// It is created by the caller for a single evaluation and is never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetingContext {
    /// The identity of the user, if known.
    #[serde(default)]
    pub user_id: Option<String>,
    /// The groups the user belongs to, in the order they should be considered.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl TargetingContext {
    /// Creates a targeting context for the given user with no group memberships.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            groups: Vec::new(),
        }
    }

    /// Adds a group membership.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }
}

/// AccountContext carries the account an evaluation is performed on behalf of.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountContext {
    pub account_id: String,
}

impl AccountContext {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// HttpContext carries the parts of an incoming request that filters may inspect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpContext {
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl HttpContext {
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
        }
    }
}

/// EvaluationContext is the set of external contexts passed along with a feature evaluation.
///
/// A contextual filter is only invoked when the context it requires is present; see
/// [crate::AppContext].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EvaluationContext {
    targeting: Option<TargetingContext>,
    account: Option<AccountContext>,
    http: Option<HttpContext>,
}

impl EvaluationContext {
    /// Creates an empty context; only simple filters can contribute to evaluations using it.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targeting(mut self, targeting: TargetingContext) -> Self {
        self.targeting = Some(targeting);
        self
    }

    pub fn with_account(mut self, account: AccountContext) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_http(mut self, http: HttpContext) -> Self {
        self.http = Some(http);
        self
    }

    pub fn targeting(&self) -> Option<&TargetingContext> {
        self.targeting.as_ref()
    }

    pub fn account(&self) -> Option<&AccountContext> {
        self.account.as_ref()
    }

    pub fn http(&self) -> Option<&HttpContext> {
        self.http.as_ref()
    }

    /// Returns true if no external context was supplied.
    pub fn is_empty(&self) -> bool {
        self.targeting.is_none() && self.account.is_none() && self.http.is_none()
    }
}

impl From<TargetingContext> for EvaluationContext {
    fn from(targeting: TargetingContext) -> Self {
        EvaluationContext::new().with_targeting(targeting)
    }
}

impl From<AccountContext> for EvaluationContext {
    fn from(account: AccountContext) -> Self {
        EvaluationContext::new().with_account(account)
    }
}

impl From<HttpContext> for EvaluationContext {
    fn from(http: HttpContext) -> Self {
        EvaluationContext::new().with_http(http)
    }
}
