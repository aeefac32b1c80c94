use async_trait::async_trait;
use serde::Deserialize;
use serde_with::formats::CommaSeparator;
use serde_with::{serde_as, PickFirst, StringWithSeparator};
use tokio_util::sync::CancellationToken;

use crate::context::AccountContext;
use crate::error::{Error, Result};
use crate::filter::{ContextualFeatureFilter, FilterEvaluationContext};

/// Settings of the [AccountIdFilter]. Accounts may be listed as an array or as one comma
/// separated string.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AccountFilterSettings {
    #[serde_as(as = "PickFirst<(_, StringWithSeparator<CommaSeparator, String>)>")]
    #[serde(default)]
    pub allowed_accounts: Vec<String>,
}

/// AccountIdFilter enables a feature for an allow-list of accounts.
///
/// It is only invoked when an [AccountContext] was supplied for the evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccountIdFilter;

impl AccountIdFilter {
    pub const ALIAS: &'static str = "AccountId";
}

#[async_trait]
impl ContextualFeatureFilter for AccountIdFilter {
    type Context = AccountContext;

    fn alias(&self) -> &str {
        Self::ALIAS
    }

    async fn evaluate(
        &self,
        context: &FilterEvaluationContext<'_>,
        account: &AccountContext,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        if account.account_id.is_empty() {
            return Err(Error::ArgumentValidation(
                "the account context has no account id".to_string(),
            ));
        }

        let settings: AccountFilterSettings = context.settings()?;
        Ok(settings
            .allowed_accounts
            .iter()
            .any(|allowed| allowed.trim() == account.account_id))
    }
}
