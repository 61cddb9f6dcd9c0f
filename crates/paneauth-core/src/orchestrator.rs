//! Token-acquisition fallback state machine.
//!
//! ```text
//! Idle -> ResolvingContext -> AttemptingSilent -> AttemptingSso
//!      -> AttemptingInteractivePopup -> AttemptingDialogRelay -> Succeeded | Failed
//! ```
//!
//! Each step runs at most once and every transition is guarded by a named
//! predicate. Fallback-eligible failures become transitions; only the final
//! failure is surfaced.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use url::Url;

use crate::account::{AccountContext, AccountContextResolver, AccountInfo};
use crate::dialog::{self, DialogMessage, RelayChannel, RelayOutcome};
use crate::error::{AuthFailure, FlowError};
use crate::gateway::{AuthResult, PublicClientGateway};
use crate::host::HostIntegration;
use crate::logging::mask_token;
use crate::request::{TokenRequest, TokenRequestBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    ResolvingContext,
    AttemptingSilent,
    AttemptingSso,
    AttemptingInteractivePopup,
    AttemptingDialogRelay,
    Succeeded,
    Failed,
}

impl FlowState {
    pub fn name(self) -> &'static str {
        match self {
            FlowState::Idle => "Idle",
            FlowState::ResolvingContext => "ResolvingContext",
            FlowState::AttemptingSilent => "AttemptingSilent",
            FlowState::AttemptingSso => "AttemptingSso",
            FlowState::AttemptingInteractivePopup => "AttemptingInteractivePopup",
            FlowState::AttemptingDialogRelay => "AttemptingDialogRelay",
            FlowState::Succeeded => "Succeeded",
            FlowState::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Succeeded | FlowState::Failed)
    }
}

/// Outcome of one `authenticate` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub result: Result<AuthResult, FlowError>,
    /// Every state entered, from `Idle` to the terminal state
    pub trace: Vec<FlowState>,
    /// Whether the sign-out affordance must be shown
    pub show_sign_out: bool,
}

impl FlowReport {
    /// Text shown to the user: the access token, or the error's name and message.
    pub fn display_text(&self) -> String {
        match &self.result {
            Ok(result) => result.access_token.clone(),
            Err(e) => e.to_string(),
        }
    }

    pub fn terminal_state(&self) -> FlowState {
        self.trace.last().copied().unwrap_or(FlowState::Idle)
    }

    pub fn visited(&self, state: FlowState) -> bool {
        self.trace.contains(&state)
    }
}

/// Silent acquisition is only possible with a matched cached account.
fn should_attempt_silent(request: &TokenRequest) -> bool {
    request.account().is_some()
}

/// SSO-silent needs a login hint to target the host session.
fn should_attempt_sso(request: &TokenRequest) -> bool {
    request.login_hint().is_some()
}

/// Only a blocked popup falls through to the dialog relay.
fn should_relay_to_dialog(failure: &AuthFailure) -> bool {
    failure.is_popup_blocked()
}

/// Which branch produced the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    NonInteractive,
    Interactive,
}

struct Run {
    trace: Vec<FlowState>,
}

/// Holds the orchestrator's single dialog slot; released on drop, so an
/// abandoned attempt cannot leave the slot taken.
struct DialogSlot<'a>(&'a AtomicBool);

impl<'a> DialogSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DialogSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Publishes `Idle` when a run ends, completed or dropped mid-flight.
struct IdleOnDrop<'a>(&'a watch::Sender<FlowState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(FlowState::Idle);
    }
}

/// Drives the ordered authentication attempts for one taskpane session.
pub struct FallbackOrchestrator {
    host: Arc<dyn HostIntegration>,
    gateway: Arc<PublicClientGateway>,
    resolver: AccountContextResolver,
    builder: TokenRequestBuilder,
    dialog_page: Url,
    dialog_open: AtomicBool,
    state: watch::Sender<FlowState>,
}

impl FallbackOrchestrator {
    pub fn new(
        host: Arc<dyn HostIntegration>,
        gateway: Arc<PublicClientGateway>,
        builder: TokenRequestBuilder,
        dialog_page: Url,
    ) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self {
            resolver: AccountContextResolver::new(Arc::clone(&host)),
            host,
            gateway,
            builder,
            dialog_page,
            dialog_open: AtomicBool::new(false),
            state,
        }
    }

    pub fn gateway(&self) -> &Arc<PublicClientGateway> {
        &self.gateway
    }

    pub fn resolver(&self) -> &AccountContextResolver {
        &self.resolver
    }

    pub fn state(&self) -> FlowState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    fn enter(&self, run: &mut Run, next: FlowState) {
        tracing::debug!(from = self.state().name(), to = next.name(), "flow transition");
        run.trace.push(next);
        self.state.send_replace(next);
    }

    /// Runs the full fallback chain: silent, SSO-silent, popup, dialog relay.
    pub async fn authenticate(&self) -> FlowReport {
        let _idle = IdleOnDrop(&self.state);
        let mut run = Run {
            trace: vec![FlowState::Idle],
        };
        self.enter(&mut run, FlowState::ResolvingContext);
        let context = self.resolver.resolve().await;

        let outcome = match self.builder.build(&self.gateway, Some(&context)).await {
            Ok(request) => {
                let request = self.with_redirect_page(request);
                self.attempt_chain(&mut run, &context, &request).await
            }
            Err(e) => (Err(FlowError::from(e)), Branch::NonInteractive),
        };
        self.finish(run, outcome)
    }

    /// Goes straight from context resolution to the dialog relay.
    pub async fn authenticate_with_dialog(&self) -> FlowReport {
        let _idle = IdleOnDrop(&self.state);
        let mut run = Run {
            trace: vec![FlowState::Idle],
        };
        self.enter(&mut run, FlowState::ResolvingContext);
        let context = self.resolver.resolve().await;
        let result = self.attempt_dialog_relay(&mut run, &context).await;
        self.finish(run, (result, Branch::Interactive))
    }

    async fn attempt_chain(
        &self,
        run: &mut Run,
        context: &AccountContext,
        request: &TokenRequest,
    ) -> (Result<AuthResult, FlowError>, Branch) {
        if should_attempt_silent(request) {
            self.enter(run, FlowState::AttemptingSilent);
            match self.gateway.acquire_silent(request).await {
                Ok(result) => return (Ok(result), Branch::NonInteractive),
                Err(e) => tracing::debug!("silent acquisition failed, falling back: {e}"),
            }
        }

        if should_attempt_sso(request) {
            self.enter(run, FlowState::AttemptingSso);
            match self.gateway.sso_silent(request).await {
                Ok(result) => {
                    let result = self.activate(result.account.clone(), result).await;
                    return (result, Branch::NonInteractive);
                }
                Err(e) => tracing::debug!("sso-silent failed, falling back: {e}"),
            }
        }

        self.enter(run, FlowState::AttemptingInteractivePopup);
        match self.gateway.acquire_popup(request).await {
            Ok(result) => {
                let result = self.activate(result.account.clone(), result).await;
                (result, Branch::Interactive)
            }
            Err(e) if should_relay_to_dialog(&e) => {
                tracing::info!("popup blocked, relaying through dialog: {e}");
                (
                    self.attempt_dialog_relay(run, context).await,
                    Branch::Interactive,
                )
            }
            Err(e) => (Err(FlowError::InteractivePopup(e)), Branch::Interactive),
        }
    }

    async fn attempt_dialog_relay(
        &self,
        run: &mut Run,
        context: &AccountContext,
    ) -> Result<AuthResult, FlowError> {
        self.enter(run, FlowState::AttemptingDialogRelay);

        let Some(slot) = DialogSlot::acquire(&self.dialog_open) else {
            return Err(FlowError::DialogBusy);
        };
        let outcome = self.run_dialog(context).await;
        drop(slot);

        match outcome? {
            RelayOutcome::Message(DialogMessage::Token { token }) => {
                let account = self.recover_account(context).await;
                let result = AuthResult {
                    access_token: token,
                    account: account.clone(),
                };
                self.activate(account, result).await
            }
            RelayOutcome::Message(DialogMessage::Error { error }) => {
                Err(FlowError::DialogRelay { error })
            }
            RelayOutcome::Malformed(e) => Err(FlowError::Unknown(e.to_string())),
            RelayOutcome::Cancelled => Err(FlowError::DialogCancelled),
        }
    }

    /// Interactive requests return to the configured redirect page.
    fn with_redirect_page(&self, request: TokenRequest) -> TokenRequest {
        match self.gateway.config().redirect_uri() {
            Ok(uri) => request.with_redirect_uri(uri.as_str()),
            Err(e) => {
                tracing::warn!("redirect page unavailable, using client default: {e:#}");
                request
            }
        }
    }

    async fn run_dialog(&self, context: &AccountContext) -> Result<RelayOutcome, FlowError> {
        let url = dialog::login_url(&self.dialog_page, context)
            .map_err(|e| FlowError::Unknown(format!("{e:#}")))?;
        let handle = self
            .host
            .display_dialog(&url)
            .await
            .map_err(|e| FlowError::DialogUnavailable(e.to_string()))?;
        Ok(RelayChannel::attach(handle).wait().await)
    }

    /// The relay only carries a token; find the account it was issued for
    /// in the shared cache.
    async fn recover_account(&self, context: &AccountContext) -> Option<AccountInfo> {
        if let Ok(Some(account)) = self.gateway.account(&context.to_filter()).await {
            return Some(account);
        }
        match self.gateway.all_accounts().await {
            Ok(accounts) if accounts.len() == 1 => accounts.into_iter().next(),
            _ => None,
        }
    }

    /// Marks the result's account active before reporting success. Without
    /// an account the active account is left as it is.
    async fn activate(
        &self,
        account: Option<AccountInfo>,
        result: AuthResult,
    ) -> Result<AuthResult, FlowError> {
        if account.is_some() {
            self.gateway
                .set_active_account(account)
                .await
                .map_err(FlowError::from)?;
        }
        Ok(result)
    }

    fn finish(&self, mut run: Run, outcome: (Result<AuthResult, FlowError>, Branch)) -> FlowReport {
        let (result, branch) = outcome;
        match &result {
            Ok(r) => {
                tracing::info!(token = %mask_token(&r.access_token), "authentication succeeded");
                self.enter(&mut run, FlowState::Succeeded);
            }
            Err(e) => {
                tracing::warn!("authentication failed: {e}");
                self.enter(&mut run, FlowState::Failed);
            }
        }
        let show_sign_out =
            branch == Branch::Interactive && !self.host.supports_nested_app_auth();

        FlowReport {
            result,
            trace: run.trace,
            show_sign_out,
        }
    }
}
