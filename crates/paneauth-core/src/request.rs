//! Token request shapes.
//!
//! A request targets exactly one of: a matched cached account (silent), a
//! login hint (SSO-silent), or an interactive prompt. The order encodes a
//! strict preference for non-interactive acquisition.

use serde::{Deserialize, Serialize};

use crate::account::{AccountContext, AccountInfo};
use crate::error::AuthFailure;
use crate::gateway::PublicClientGateway;

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &["user.read"];

/// Interactive prompt behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    SelectAccount,
    Login,
    Consent,
    None,
}

impl Prompt {
    pub fn as_str(self) -> &'static str {
        match self {
            Prompt::SelectAccount => "select_account",
            Prompt::Login => "login",
            Prompt::Consent => "consent",
            Prompt::None => "none",
        }
    }
}

/// What a request is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    Account(AccountInfo),
    LoginHint(String),
    Prompt(Prompt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub scopes: Vec<String>,
    pub target: RequestTarget,
    /// Page the identity provider returns to for redirect flows
    pub redirect_uri: Option<String>,
}

impl TokenRequest {
    /// Applies the targeting rule: matched account, else login hint, else
    /// an account-picker prompt.
    pub fn select(
        scopes: Vec<String>,
        matched: Option<AccountInfo>,
        context: Option<&AccountContext>,
    ) -> Self {
        let target = if let Some(account) = matched {
            RequestTarget::Account(account)
        } else if let Some(hint) = context.and_then(|c| c.login_hint.clone()) {
            RequestTarget::LoginHint(hint)
        } else {
            RequestTarget::Prompt(Prompt::SelectAccount)
        };
        Self {
            scopes,
            target,
            redirect_uri: None,
        }
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn account(&self) -> Option<&AccountInfo> {
        match &self.target {
            RequestTarget::Account(account) => Some(account),
            _ => None,
        }
    }

    pub fn login_hint(&self) -> Option<&str> {
        match &self.target {
            RequestTarget::LoginHint(hint) => Some(hint),
            _ => None,
        }
    }

    pub fn prompt(&self) -> Option<Prompt> {
        match &self.target {
            RequestTarget::Prompt(prompt) => Some(*prompt),
            _ => None,
        }
    }

    /// Space-separated scope string as sent to the authorize endpoint.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Builds token requests for a fixed scope set.
#[derive(Debug, Clone)]
pub struct TokenRequestBuilder {
    scopes: Vec<String>,
}

impl Default for TokenRequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect())
    }
}

impl TokenRequestBuilder {
    pub fn new(scopes: Vec<String>) -> Self {
        Self { scopes }
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Builds a request, matching the context against the gateway's accounts.
    ///
    /// Without a context the active account is used as the match.
    ///
    /// # Errors
    /// Returns an error if the identity client cannot be initialized.
    pub async fn build(
        &self,
        gateway: &PublicClientGateway,
        context: Option<&AccountContext>,
    ) -> Result<TokenRequest, AuthFailure> {
        let matched = match context {
            Some(ctx) => gateway.account(&ctx.to_filter()).await?,
            None => gateway.active_account().await?,
        };
        let request = TokenRequest::select(self.scopes.clone(), matched, context);
        tracing::debug!(
            account = request.account().is_some(),
            login_hint = request.login_hint().is_some(),
            prompt = request.prompt().map(Prompt::as_str),
            scopes = %request.scope_string(),
            "built token request"
        );
        Ok(request)
    }
}
