use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of failure categories reported by the identity client.
///
/// Anything the provider reports that is not recognized lands in `Unknown`,
/// which the orchestrator treats as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthFailureKind {
    /// No cached account could serve the request
    NoAccount,
    /// The provider needs the user to interact (login, consent, MFA)
    InteractionRequired,
    /// The popup window could not be created or shown
    PopupBlocked,
    /// Transport-level failure talking to the identity provider
    NetworkError,
    /// The user dismissed or denied the sign-in
    UserCancelled,
    /// Anything else
    Unknown,
}

impl AuthFailureKind {
    /// Maps a provider error code onto a failure kind.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "no_account_error" | "no_account_in_silent_request" | "no_tokens_found" => {
                AuthFailureKind::NoAccount
            }
            "interaction_required"
            | "login_required"
            | "consent_required"
            | "invalid_grant"
            | "bad_token"
            | "monitor_window_timeout" => AuthFailureKind::InteractionRequired,
            "popup_window_error" | "empty_window_error" | "popup_blocked" => {
                AuthFailureKind::PopupBlocked
            }
            "no_network_connectivity"
            | "post_request_failed"
            | "get_request_failed"
            | "endpoints_resolution_error" => AuthFailureKind::NetworkError,
            "user_cancelled" | "access_denied" => AuthFailureKind::UserCancelled,
            _ => AuthFailureKind::Unknown,
        }
    }

    /// Parses the identifying name produced by [`AuthFailureKind::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.name() == name)
    }

    /// Identifying name, used on the dialog wire and in user-visible output.
    pub fn name(self) -> &'static str {
        match self {
            AuthFailureKind::NoAccount => "NoAccount",
            AuthFailureKind::InteractionRequired => "InteractionRequired",
            AuthFailureKind::PopupBlocked => "PopupBlocked",
            AuthFailureKind::NetworkError => "NetworkError",
            AuthFailureKind::UserCancelled => "UserCancelled",
            AuthFailureKind::Unknown => "Unknown",
        }
    }

    pub fn all() -> &'static [AuthFailureKind] {
        &[
            AuthFailureKind::NoAccount,
            AuthFailureKind::InteractionRequired,
            AuthFailureKind::PopupBlocked,
            AuthFailureKind::NetworkError,
            AuthFailureKind::UserCancelled,
            AuthFailureKind::Unknown,
        ]
    }
}

impl fmt::Display for AuthFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure returned by any identity-client operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    pub kind: AuthFailureKind,
    /// Raw provider error code, when the provider supplied one
    pub code: Option<String>,
    /// One-line reason suitable for display
    pub message: String,
}

impl AuthFailure {
    pub fn new(kind: AuthFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Builds a failure from a provider error code, classifying it.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: AuthFailureKind::from_code(&code),
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AuthFailureKind::Unknown, message)
    }

    pub fn is_popup_blocked(&self) -> bool {
        self.kind == AuthFailureKind::PopupBlocked
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for AuthFailure {}

/// Unrecoverable outcome of a token-acquisition run, surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The interactive popup failed for a reason other than being blocked
    InteractivePopup(AuthFailure),
    /// The dialog relay reported an error name
    DialogRelay { error: String },
    /// The host could not open the dialog window
    DialogUnavailable(String),
    /// The dialog went away before relaying a message
    DialogCancelled,
    /// A dialog is already open for this orchestrator
    DialogBusy,
    /// Anything else, stringified
    Unknown(String),
}

impl FlowError {
    /// Identifying name shown to the user.
    pub fn name(&self) -> &'static str {
        match self {
            FlowError::InteractivePopup(_) => "InteractivePopupFailure",
            FlowError::DialogRelay { .. } => "DialogRelayFailure",
            FlowError::DialogUnavailable(_) => "DialogUnavailable",
            FlowError::DialogCancelled => "DialogCancelled",
            FlowError::DialogBusy => "DialogBusy",
            FlowError::Unknown(_) => "UnknownFailure",
        }
    }

    /// The failure kind, when one can be recovered.
    pub fn kind(&self) -> Option<AuthFailureKind> {
        match self {
            FlowError::InteractivePopup(failure) => Some(failure.kind),
            FlowError::DialogRelay { error } => AuthFailureKind::from_name(error),
            _ => None,
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::InteractivePopup(failure) => write!(f, "{}: {failure}", self.name()),
            FlowError::DialogRelay { error } => write!(f, "{}: {error}", self.name()),
            FlowError::DialogUnavailable(reason) | FlowError::Unknown(reason) => {
                write!(f, "{}: {reason}", self.name())
            }
            FlowError::DialogCancelled => {
                write!(f, "{}: dialog closed before sign-in completed", self.name())
            }
            FlowError::DialogBusy => write!(f, "{}: a sign-in dialog is already open", self.name()),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<AuthFailure> for FlowError {
    fn from(failure: AuthFailure) -> Self {
        FlowError::Unknown(failure.to_string())
    }
}
