//! Scripted in-memory host and identity client.
//!
//! A [`Scenario`] describes how each strategy behaves (token or provider
//! error code), what the host knows about the user and how the dialog
//! behaves. The dialog, when scripted to relay, runs a real [`DialogRelay`]
//! against its own standard gateway that shares the account cache with the
//! taskpane, just like two same-origin pages sharing browser storage.
//!
//! Every call is recorded in a [`CallLog`] for inspection.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::account::{AccountContext, AccountInfo};
use crate::config::AuthConfig;
use crate::error::AuthFailure;
use crate::gateway::{
    AuthFuture, AuthResult, ClientFactory, ClientVariant, IdentityClient, PublicClientGateway,
};
use crate::logging::{IdentityLogLevel, IdentityLogger};
use crate::host::{
    DialogEvent, DialogEventHandler, DialogHandle, HostAuthContext, HostError, HostFuture,
    HostIntegration, NESTED_APP_AUTH, ParentChannel,
};
use crate::orchestrator::FallbackOrchestrator;
use crate::relay::{DialogRelay, RelayStep};
use crate::request::{RequestTarget, TokenRequest, TokenRequestBuilder};
use crate::taskpane::{OutputSink, Taskpane};

const DEFAULT_ENVIRONMENT: &str = "login.microsoftonline.com";
const FALLBACK_USERNAME: &str = "user@contoso.com";
const FALLBACK_TENANT: &str = "common";

/// Scripted behaviour of one identity operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Step {
    /// Succeeds with `token`, issued for `username` when given
    Token {
        token: String,
        #[serde(default)]
        username: Option<String>,
    },
    /// Fails with a provider error code
    Fail { code: String },
}

impl Default for Step {
    fn default() -> Self {
        Step::Fail {
            code: "interaction_required".to_string(),
        }
    }
}

/// Scripted behaviour of the dialog window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum DialogScript {
    /// Run the dialog relay page (redirect, reload, message the opener)
    #[default]
    Relay,
    /// Send this raw text to the opener
    Message { text: String },
    /// The user closes the dialog
    Closed,
    /// The host refuses to open the dialog
    Unavailable,
}

/// Account seeded into the shared cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioAccount {
    pub username: String,
    pub tenant_id: String,
    pub local_account_id: String,
    pub name: Option<String>,
}

/// Environment and tenant that issued the simulated accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Authority {
    environment: String,
    tenant: String,
}

impl Default for Authority {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            tenant: FALLBACK_TENANT.to_string(),
        }
    }
}

impl Authority {
    /// Reads host and tenant from the configured authority URL.
    fn from_config(config: &AuthConfig) -> Self {
        let fallback = Self::default();
        let environment = config
            .authority_url()
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or(fallback.environment);
        let tenant = config.authority_tenant().unwrap_or(fallback.tenant);
        Self {
            environment,
            tenant,
        }
    }
}

impl ScenarioAccount {
    fn into_info(self, authority: &Authority) -> AccountInfo {
        let tenant_id = if self.tenant_id.is_empty() {
            authority.tenant.clone()
        } else {
            self.tenant_id
        };
        let local_account_id = if self.local_account_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.local_account_id
        };
        AccountInfo {
            home_account_id: format!("{local_account_id}.{tenant_id}"),
            environment: authority.environment.clone(),
            tenant_id,
            username: self.username,
            local_account_id,
            name: self.name,
        }
    }
}

/// Full description of a simulated environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Host supports the `NestedAppAuth` requirement set
    pub nested_app_auth: bool,
    /// Hints the host returns; absent means the host call fails
    pub host_context: Option<AccountContext>,
    /// Accounts already in the shared cache
    pub accounts: Vec<ScenarioAccount>,
    /// Username of the active account
    pub active_account: Option<String>,
    /// Identity client construction fails with this code
    pub client_init_error: Option<String>,
    pub silent: Step,
    pub sso: Step,
    pub popup: Step,
    /// Result of the dialog's redirect round trip
    pub redirect: Step,
    pub dialog: DialogScript,
}

impl Scenario {
    /// Loads a scenario from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse scenario from {}", path.display()))
    }
}

/// Ordered record of every scripted call.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn entries(&self) -> MutexGuard<'_, Vec<String>> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries().push(entry.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.entries().clone()
    }

    /// Number of entries equal to `name` or starting with `name:`.
    pub fn count(&self, name: &str) -> usize {
        let prefix = format!("{name}:");
        self.entries()
            .iter()
            .filter(|e| e.as_str() == name || e.starts_with(&prefix))
            .count()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    accounts: Vec<AccountInfo>,
    active: Option<AccountInfo>,
    /// Request of a redirect sign-in in progress
    redirect_pending: Option<TokenRequest>,
}

/// Account cache shared by every client of one simulation.
#[derive(Debug, Clone, Default)]
struct SharedCache {
    state: Arc<Mutex<CacheState>>,
    authority: Arc<Authority>,
}

impl SharedCache {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn seeded(scenario: &Scenario, authority: Authority) -> Self {
        let accounts: Vec<AccountInfo> = scenario
            .accounts
            .iter()
            .cloned()
            .map(|account| account.into_info(&authority))
            .collect();
        let active = scenario.active_account.as_deref().and_then(|username| {
            accounts
                .iter()
                .find(|a| a.username.eq_ignore_ascii_case(username))
                .cloned()
        });
        Self {
            state: Arc::new(Mutex::new(CacheState {
                accounts,
                active,
                redirect_pending: None,
            })),
            authority: Arc::new(authority),
        }
    }

    /// Finds or adds the account for `username`.
    fn upsert(&self, username: &str) -> AccountInfo {
        let mut state = self.state();
        if let Some(existing) = state
            .accounts
            .iter()
            .find(|a| a.username.eq_ignore_ascii_case(username))
        {
            return existing.clone();
        }
        let account = ScenarioAccount {
            username: username.to_string(),
            ..ScenarioAccount::default()
        }
        .into_info(&self.authority);
        state.accounts.push(account.clone());
        account
    }
}

/// Scripted identity client.
///
/// Reports what it does through the logger callback it was created with.
/// Lines naming the user are flagged as PII.
pub struct ScriptedClient {
    variant: ClientVariant,
    scenario: Arc<Scenario>,
    cache: SharedCache,
    log: CallLog,
    logger: IdentityLogger,
    /// Redirect page used when a request names none
    redirect_uri: String,
    post_logout_redirect_uri: String,
}

impl ScriptedClient {
    fn emit(&self, level: IdentityLogLevel, message: &str, contains_pii: bool) {
        (self.logger)(level, message, contains_pii);
    }

    fn play(
        &self,
        operation: &str,
        step: &Step,
        request: Option<&TokenRequest>,
    ) -> Result<AuthResult, AuthFailure> {
        match step {
            Step::Token { token, username } => {
                let username = username
                    .clone()
                    .or_else(|| match request.map(|r| &r.target) {
                        Some(RequestTarget::Account(account)) => Some(account.username.clone()),
                        Some(RequestTarget::LoginHint(hint)) => Some(hint.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| FALLBACK_USERNAME.to_string());
                self.emit(
                    IdentityLogLevel::Verbose,
                    &format!("{operation}: token acquired"),
                    false,
                );
                self.emit(
                    IdentityLogLevel::Info,
                    &format!("{operation}: token issued for {username}"),
                    true,
                );
                Ok(AuthResult {
                    access_token: token.clone(),
                    account: Some(self.cache.upsert(&username)),
                })
            }
            Step::Fail { code } => {
                self.emit(
                    IdentityLogLevel::Warning,
                    &format!("{operation}: failed with {code}"),
                    false,
                );
                Err(AuthFailure::from_code(
                    code.clone(),
                    format!("scripted {code}"),
                ))
            }
        }
    }

    fn clear_cache(&self) {
        let mut state = self.cache.state();
        state.accounts.clear();
        state.active = None;
    }
}

impl IdentityClient for ScriptedClient {
    fn acquire_token_silent<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, AuthResult> {
        Box::pin(async move {
            self.log.record("acquire_token_silent");
            self.play("acquire_token_silent", &self.scenario.silent, Some(request))
        })
    }

    fn sso_silent<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, AuthResult> {
        Box::pin(async move {
            self.log.record("sso_silent");
            self.play("sso_silent", &self.scenario.sso, Some(request))
        })
    }

    fn acquire_token_popup<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, AuthResult> {
        Box::pin(async move {
            let redirect_uri = request.redirect_uri.as_deref().unwrap_or(&self.redirect_uri);
            self.log.record(format!("acquire_token_popup:{redirect_uri}"));
            if self.variant == ClientVariant::Nestable {
                self.emit(
                    IdentityLogLevel::Verbose,
                    "nestable client brokering popup through the host",
                    false,
                );
            }
            self.play("acquire_token_popup", &self.scenario.popup, Some(request))
        })
    }

    fn login_redirect<'a>(&'a self, request: &'a TokenRequest) -> AuthFuture<'a, ()> {
        Box::pin(async move {
            let redirect_uri = request.redirect_uri.as_deref().unwrap_or(&self.redirect_uri);
            self.log.record(format!("login_redirect:{redirect_uri}"));
            self.emit(
                IdentityLogLevel::Verbose,
                &format!("login_redirect: scopes {}", request.scope_string()),
                false,
            );
            self.cache.state().redirect_pending = Some(request.clone());
            Ok(())
        })
    }

    fn handle_redirect_result(&self) -> AuthFuture<'_, Option<AuthResult>> {
        Box::pin(async move {
            self.log.record("handle_redirect_result");
            let pending = self.cache.state().redirect_pending.take();
            match pending {
                Some(request) => self
                    .play("handle_redirect_result", &self.scenario.redirect, Some(&request))
                    .map(Some),
                None => Ok(None),
            }
        })
    }

    fn logout_popup(&self) -> AuthFuture<'_, ()> {
        Box::pin(async move {
            self.log
                .record(format!("logout_popup:{}", self.post_logout_redirect_uri));
            self.clear_cache();
            self.emit(IdentityLogLevel::Info, "logout_popup: cache cleared", false);
            Ok(())
        })
    }

    fn logout_redirect(&self) -> AuthFuture<'_, ()> {
        Box::pin(async move {
            self.log
                .record(format!("logout_redirect:{}", self.post_logout_redirect_uri));
            self.clear_cache();
            self.emit(IdentityLogLevel::Info, "logout_redirect: cache cleared", false);
            Ok(())
        })
    }

    fn active_account(&self) -> Option<AccountInfo> {
        self.cache.state().active.clone()
    }

    fn all_accounts(&self) -> Vec<AccountInfo> {
        self.cache.state().accounts.clone()
    }

    fn set_active_account(&self, account: Option<AccountInfo>) {
        let label = account.as_ref().map_or("none", |a| a.username.as_str());
        self.log.record(format!("set_active_account:{label}"));
        self.cache.state().active = account;
    }
}

/// Builds scripted clients over one shared cache.
pub struct ScriptedFactory {
    scenario: Arc<Scenario>,
    cache: SharedCache,
    log: CallLog,
    created: AtomicUsize,
    init_delay: Option<Duration>,
}

impl ScriptedFactory {
    /// Number of clients constructed so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ClientFactory for ScriptedFactory {
    fn create<'a>(
        &'a self,
        variant: ClientVariant,
        config: &'a AuthConfig,
        logger: IdentityLogger,
    ) -> AuthFuture<'a, Arc<dyn IdentityClient>> {
        Box::pin(async move {
            self.log.record(format!("create:{variant:?}"));
            if let Some(delay) = self.init_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(code) = &self.scenario.client_init_error {
                return Err(AuthFailure::from_code(
                    code.clone(),
                    format!("cannot create client {}", config.client_id),
                ));
            }
            let redirect_uri = config
                .redirect_uri()
                .map_err(|e| AuthFailure::unknown(format!("{e:#}")))?;
            let post_logout_redirect_uri = config
                .post_logout_redirect_uri()
                .map_err(|e| AuthFailure::unknown(format!("{e:#}")))?;
            self.created.fetch_add(1, Ordering::SeqCst);
            logger(
                IdentityLogLevel::Info,
                &format!("{variant:?} client created for {}", config.authority),
                false,
            );
            let client: Arc<dyn IdentityClient> = Arc::new(ScriptedClient {
                variant,
                scenario: Arc::clone(&self.scenario),
                cache: self.cache.clone(),
                log: self.log.clone(),
                logger,
                redirect_uri: redirect_uri.to_string(),
                post_logout_redirect_uri: post_logout_redirect_uri.to_string(),
            });
            Ok(client)
        })
    }
}

#[derive(Default)]
struct DialogInner {
    handler: Option<DialogEventHandler>,
    queued: VecDeque<DialogEvent>,
}

/// Scripted dialog window. Events raised before a handler is registered are
/// queued and delivered on registration.
#[derive(Clone)]
pub struct ScriptedDialog {
    inner: Arc<Mutex<DialogInner>>,
    log: CallLog,
}

impl ScriptedDialog {
    fn new(log: CallLog) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DialogInner::default())),
            log,
        }
    }

    fn inner(&self) -> MutexGuard<'_, DialogInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Raises an event towards the opener.
    pub fn raise(&self, event: DialogEvent) {
        let mut inner = self.inner();
        match inner.handler.as_ref() {
            Some(handler) => handler(event),
            None => inner.queued.push_back(event),
        }
    }
}

impl DialogHandle for ScriptedDialog {
    fn add_event_handler(&self, handler: DialogEventHandler) {
        let mut inner = self.inner();
        while let Some(event) = inner.queued.pop_front() {
            handler(event);
        }
        inner.handler = Some(handler);
    }

    fn close(&self) {
        self.log.record("dialog.close");
    }
}

impl ParentChannel for ScriptedDialog {
    fn message_parent(&self, message: &str) -> HostFuture<'_, ()> {
        let message = message.to_string();
        Box::pin(async move {
            self.log.record(format!("message_parent:{message}"));
            self.raise(DialogEvent::Message(message));
            Ok(())
        })
    }
}

/// Scripted Office host.
pub struct ScriptedHost {
    scenario: Arc<Scenario>,
    factory: Arc<ScriptedFactory>,
    config: AuthConfig,
    log: CallLog,
}

impl ScriptedHost {
    /// Runs the dialog relay page: first load, then the reload after the
    /// redirect round trip.
    async fn run_relay_page(
        factory: Arc<ScriptedFactory>,
        config: AuthConfig,
        dialog: ScriptedDialog,
        url: Url,
    ) {
        let redirect_uri = match config.dialog_url() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!("dialog page url invalid: {e:#}");
                dialog.raise(DialogEvent::Closed);
                return;
            }
        };
        let builder = TokenRequestBuilder::new(config.scopes.clone());
        let gateway = Arc::new(PublicClientGateway::new(
            factory,
            config,
            ClientVariant::Standard,
        ));
        let relay = DialogRelay::new(gateway, Arc::new(dialog.clone()), builder, redirect_uri);

        for _ in 0..2 {
            match relay.on_load(&url).await {
                Ok(RelayStep::RedirectStarted) => {}
                Ok(RelayStep::LoggedOut | RelayStep::Relayed(_)) => return,
                Err(e) => {
                    tracing::warn!("dialog relay could not reach opener: {e}");
                    break;
                }
            }
        }
        dialog.raise(DialogEvent::Closed);
    }
}

impl HostIntegration for ScriptedHost {
    fn auth_context(&self) -> HostFuture<'_, HostAuthContext> {
        Box::pin(async move {
            self.log.record("auth_context");
            match &self.scenario.host_context {
                Some(ctx) => Ok(HostAuthContext {
                    login_hint: ctx.login_hint.clone(),
                    tenant_id: ctx.tenant_id.clone(),
                    user_object_id: ctx.local_account_id.clone(),
                }),
                None => Err(HostError::with_code(13000, "getAuthContext is not supported")),
            }
        })
    }

    fn is_set_supported(&self, requirement_set: &str) -> bool {
        requirement_set == NESTED_APP_AUTH && self.scenario.nested_app_auth
    }

    fn display_dialog(&self, url: &Url) -> HostFuture<'_, Box<dyn DialogHandle>> {
        let url = url.clone();
        Box::pin(async move {
            self.log.record(format!("display_dialog:{url}"));
            let dialog = ScriptedDialog::new(self.log.clone());
            match &self.scenario.dialog {
                DialogScript::Unavailable => {
                    return Err(HostError::with_code(12009, "the user chose to ignore the dialog"));
                }
                DialogScript::Closed => dialog.raise(DialogEvent::Closed),
                DialogScript::Message { text } => dialog.raise(DialogEvent::Message(text.clone())),
                DialogScript::Relay => {
                    tokio::spawn(Self::run_relay_page(
                        Arc::clone(&self.factory),
                        self.config.clone(),
                        dialog.clone(),
                        url,
                    ));
                }
            }
            let handle: Box<dyn DialogHandle> = Box::new(dialog);
            Ok(handle)
        })
    }
}

/// Output sink that keeps everything shown.
#[derive(Debug, Default)]
pub struct RecordingOutput(Mutex<Vec<String>>);

impl RecordingOutput {
    pub fn lines(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<String> {
        self.lines().pop()
    }
}

impl OutputSink for RecordingOutput {
    fn show(&self, text: &str) {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(text.to_string());
    }
}

/// A complete simulated taskpane environment.
pub struct Simulation {
    pub host: Arc<ScriptedHost>,
    pub factory: Arc<ScriptedFactory>,
    pub log: CallLog,
    pub output: Arc<RecordingOutput>,
    config: AuthConfig,
}

impl Simulation {
    pub fn new(scenario: Scenario, config: AuthConfig) -> Self {
        Self::build(scenario, config, None)
    }

    /// Like [`Simulation::new`], with client construction taking `delay`.
    pub fn with_init_delay(scenario: Scenario, config: AuthConfig, delay: Duration) -> Self {
        Self::build(scenario, config, Some(delay))
    }

    fn build(scenario: Scenario, config: AuthConfig, init_delay: Option<Duration>) -> Self {
        let log = CallLog::default();
        let cache = SharedCache::seeded(&scenario, Authority::from_config(&config));
        let scenario = Arc::new(scenario);
        let factory = Arc::new(ScriptedFactory {
            scenario: Arc::clone(&scenario),
            cache,
            log: log.clone(),
            created: AtomicUsize::new(0),
            init_delay,
        });
        let host = Arc::new(ScriptedHost {
            scenario,
            factory: Arc::clone(&factory),
            config: config.clone(),
            log: log.clone(),
        });
        Self {
            host,
            factory,
            log,
            output: Arc::new(RecordingOutput::default()),
            config,
        }
    }

    /// Taskpane gateway, nestable when the scripted host supports it.
    pub fn gateway(&self) -> PublicClientGateway {
        let variant = ClientVariant::for_host(self.host.as_ref());
        PublicClientGateway::new(
            Arc::clone(&self.factory) as Arc<dyn ClientFactory>,
            self.config.clone(),
            variant,
        )
    }

    /// # Errors
    /// Returns an error if the configured dialog page URL is invalid.
    pub fn orchestrator(&self) -> Result<FallbackOrchestrator> {
        Ok(FallbackOrchestrator::new(
            Arc::clone(&self.host) as Arc<dyn HostIntegration>,
            Arc::new(self.gateway()),
            TokenRequestBuilder::new(self.config.scopes.clone()),
            self.config.dialog_url()?,
        ))
    }

    /// # Errors
    /// Returns an error if the configured dialog page URL is invalid.
    pub fn taskpane(&self) -> Result<Taskpane> {
        Ok(Taskpane::new(
            Arc::clone(&self.host) as Arc<dyn HostIntegration>,
            self.orchestrator()?,
            self.config.dialog_url()?,
            Arc::clone(&self.output) as Arc<dyn OutputSink>,
        ))
    }
}
