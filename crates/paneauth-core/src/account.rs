//! Account context and account records.
//!
//! `AccountContext` is the minimal identifying hint set the host gives us.
//! It is resolved once per session; failures degrade to an empty context so
//! that missing hints only make the token request less targeted.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::host::{HostAuthContext, HostIntegration};

/// Identity hints for the current user, as carried across the dialog boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_account_id: Option<String>,
}

impl AccountContext {
    /// True when the host supplied no hints at all.
    pub fn is_empty(&self) -> bool {
        self.login_hint.is_none() && self.tenant_id.is_none() && self.local_account_id.is_none()
    }

    /// Filter used to match this context against cached accounts.
    pub fn to_filter(&self) -> AccountFilter {
        AccountFilter {
            username: self.login_hint.clone(),
            tenant_id: self.tenant_id.clone(),
            local_account_id: self.local_account_id.clone(),
        }
    }

    /// JSON text for the `accountContext` dialog parameter.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize account context")
    }

    /// Parses the JSON text carried by the `accountContext` dialog parameter.
    ///
    /// # Errors
    /// Returns an error if the text is not a JSON account context.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse account context")
    }
}

impl From<HostAuthContext> for AccountContext {
    fn from(ctx: HostAuthContext) -> Self {
        Self {
            login_hint: ctx.login_hint,
            tenant_id: ctx.tenant_id,
            local_account_id: ctx.user_object_id,
        }
    }
}

/// Account record kept by the identity client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub home_account_id: String,
    pub environment: String,
    pub tenant_id: String,
    pub username: String,
    pub local_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Lookup filter for cached accounts.
///
/// Every field that is present must match; usernames compare
/// case-insensitively. An empty filter matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    pub username: Option<String>,
    pub tenant_id: Option<String>,
    pub local_account_id: Option<String>,
}

impl AccountFilter {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.tenant_id.is_none() && self.local_account_id.is_none()
    }

    pub fn matches(&self, account: &AccountInfo) -> bool {
        if self.is_empty() {
            return false;
        }
        let username_ok = self
            .username
            .as_deref()
            .is_none_or(|u| u.eq_ignore_ascii_case(&account.username));
        let tenant_ok = self
            .tenant_id
            .as_deref()
            .is_none_or(|t| t == account.tenant_id);
        let local_ok = self
            .local_account_id
            .as_deref()
            .is_none_or(|l| l == account.local_account_id);
        username_ok && tenant_ok && local_ok
    }
}

/// Session-scoped resolver for the host's identity hints.
///
/// The first call asks the host; every later call (including concurrent
/// ones racing the first) observes the same memoized context.
pub struct AccountContextResolver {
    host: Arc<dyn HostIntegration>,
    resolved: OnceCell<AccountContext>,
}

impl AccountContextResolver {
    pub fn new(host: Arc<dyn HostIntegration>) -> Self {
        Self {
            host,
            resolved: OnceCell::new(),
        }
    }

    /// Returns the session's account context, asking the host on first use.
    pub async fn resolve(&self) -> AccountContext {
        self.resolved
            .get_or_init(|| async {
                match self.host.auth_context().await {
                    Ok(ctx) => {
                        let context = AccountContext::from(ctx);
                        tracing::debug!(empty = context.is_empty(), "resolved account context");
                        context
                    }
                    Err(e) => {
                        tracing::warn!("host identity hints unavailable: {e}");
                        AccountContext::default()
                    }
                }
            })
            .await
            .clone()
    }

    /// The memoized context, if resolution already happened.
    pub fn resolved(&self) -> Option<&AccountContext> {
        self.resolved.get()
    }
}
