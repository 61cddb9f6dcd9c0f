//! Identity-client boundary and the per-page client gateway.
//!
//! The gateway owns exactly one identity client per page lifetime. The first
//! caller starts construction; concurrent callers await that same in-flight
//! construction and observe the same instance.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::OnceCell;

use crate::account::{AccountFilter, AccountInfo};
use crate::config::AuthConfig;
use crate::error::AuthFailure;
use crate::host::HostIntegration;
use crate::logging::{self, IdentityLogger};
use crate::request::TokenRequest;

/// Async result of an identity-client call.
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthFailure>> + Send + 'a>>;

/// Successful token acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub access_token: String,
    /// Account the token was issued for. Relayed dialog results only carry
    /// the token; the account is recovered from the shared cache when possible.
    pub account: Option<AccountInfo>,
}

/// Which public-client flavour to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVariant {
    /// Plain browser client (popup and redirect flows)
    Standard,
    /// Client that brokers through the host (nested app authentication)
    Nestable,
}

impl ClientVariant {
    /// Nestable when the host supports nested app authentication.
    pub fn for_host(host: &dyn HostIntegration) -> Self {
        if host.supports_nested_app_auth() {
            ClientVariant::Nestable
        } else {
            ClientVariant::Standard
        }
    }
}

/// Operations of a constructed identity client.
pub trait IdentityClient: Send + Sync {
    fn acquire_token_silent<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, AuthResult>;

    fn sso_silent<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, AuthResult>;

    fn acquire_token_popup<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, AuthResult>;

    /// Starts a full-page redirect sign-in. Resolves once navigation begins.
    fn login_redirect<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, ()>;

    /// Result of a redirect round-trip that brought the page back, if any.
    fn handle_redirect_result(&self) -> AuthFuture<'_, Option<AuthResult>>;

    fn logout_popup(&self) -> AuthFuture<'_, ()>;

    fn logout_redirect(&self) -> AuthFuture<'_, ()>;

    fn active_account(&self) -> Option<AccountInfo>;

    fn all_accounts(&self) -> Vec<AccountInfo>;

    fn set_active_account(&self, account: Option<AccountInfo>);

    fn account(&self, filter: &AccountFilter) -> Option<AccountInfo> {
        self.all_accounts().into_iter().find(|a| filter.matches(a))
    }
}

/// Constructs identity clients (possibly asynchronously).
///
/// The client reports its own log lines through `logger`.
pub trait ClientFactory: Send + Sync {
    fn create<'a>(
        &'a self,
        variant: ClientVariant,
        config: &'a AuthConfig,
        logger: IdentityLogger,
    ) -> AuthFuture<'a, Arc<dyn IdentityClient>>;
}

/// Gateway lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLifecycle {
    Uninitialized,
    Initializing,
    Ready,
}

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// Lazily-constructed, memoized identity client for one page.
pub struct PublicClientGateway {
    factory: Arc<dyn ClientFactory>,
    config: AuthConfig,
    variant: ClientVariant,
    logger: IdentityLogger,
    client: OnceCell<Arc<dyn IdentityClient>>,
    lifecycle: AtomicU8,
}

impl PublicClientGateway {
    pub fn new(factory: Arc<dyn ClientFactory>, config: AuthConfig, variant: ClientVariant) -> Self {
        Self {
            factory,
            config,
            variant,
            logger: logging::tracing_logger(),
            client: OnceCell::new(),
            lifecycle: AtomicU8::new(UNINITIALIZED),
        }
    }

    /// Replaces the logger callback handed to the identity client.
    #[must_use]
    pub fn with_logger(mut self, logger: IdentityLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn variant(&self) -> ClientVariant {
        self.variant
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> ClientLifecycle {
        match self.lifecycle.load(Ordering::Acquire) {
            READY => ClientLifecycle::Ready,
            INITIALIZING => ClientLifecycle::Initializing,
            _ => ClientLifecycle::Uninitialized,
        }
    }

    /// Returns the page's identity client, constructing it on first use.
    ///
    /// A failed construction leaves the gateway uninitialized so a later
    /// call can try again.
    ///
    /// # Errors
    /// Returns the factory's failure.
    pub async fn ensure_client(&self) -> Result<Arc<dyn IdentityClient>, AuthFailure> {
        let client = self
            .client
            .get_or_try_init(|| async {
                self.lifecycle.store(INITIALIZING, Ordering::Release);
                tracing::debug!(variant = ?self.variant, "creating identity client");
                let logger = Arc::clone(&self.logger);
                match self.factory.create(self.variant, &self.config, logger).await {
                    Ok(client) => {
                        self.lifecycle.store(READY, Ordering::Release);
                        Ok(client)
                    }
                    Err(e) => {
                        self.lifecycle.store(UNINITIALIZED, Ordering::Release);
                        tracing::warn!("identity client creation failed: {e}");
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(client))
    }

    /// # Errors
    /// Returns the client's failure.
    pub async fn acquire_silent(&self, request: &TokenRequest) -> Result<AuthResult, AuthFailure> {
        self.ensure_client().await?.acquire_token_silent(request).await
    }

    /// # Errors
    /// Returns the client's failure.
    pub async fn sso_silent(&self, request: &TokenRequest) -> Result<AuthResult, AuthFailure> {
        self.ensure_client().await?.sso_silent(request).await
    }

    /// # Errors
    /// Returns the client's failure.
    pub async fn acquire_popup(&self, request: &TokenRequest) -> Result<AuthResult, AuthFailure> {
        self.ensure_client().await?.acquire_token_popup(request).await
    }

    /// # Errors
    /// Returns the client's failure.
    pub async fn login_redirect(&self, request: &TokenRequest) -> Result<(), AuthFailure> {
        self.ensure_client().await?.login_redirect(request).await
    }

    /// # Errors
    /// Returns the client's failure.
    pub async fn handle_redirect_result(&self) -> Result<Option<AuthResult>, AuthFailure> {
        self.ensure_client().await?.handle_redirect_result().await
    }

    /// # Errors
    /// Returns the client's failure.
    pub async fn logout_popup(&self) -> Result<(), AuthFailure> {
        self.ensure_client().await?.logout_popup().await
    }

    /// # Errors
    /// Returns the client's failure.
    pub async fn logout_redirect(&self) -> Result<(), AuthFailure> {
        self.ensure_client().await?.logout_redirect().await
    }

    /// # Errors
    /// Returns an error if the client cannot be constructed.
    pub async fn active_account(&self) -> Result<Option<AccountInfo>, AuthFailure> {
        Ok(self.ensure_client().await?.active_account())
    }

    /// # Errors
    /// Returns an error if the client cannot be constructed.
    pub async fn all_accounts(&self) -> Result<Vec<AccountInfo>, AuthFailure> {
        Ok(self.ensure_client().await?.all_accounts())
    }

    /// # Errors
    /// Returns an error if the client cannot be constructed.
    pub async fn account(&self, filter: &AccountFilter) -> Result<Option<AccountInfo>, AuthFailure> {
        Ok(self.ensure_client().await?.account(filter))
    }

    /// # Errors
    /// Returns an error if the client cannot be constructed.
    pub async fn set_active_account(&self, account: Option<AccountInfo>) -> Result<(), AuthFailure> {
        self.ensure_client().await?.set_active_account(account);
        Ok(())
    }
}
