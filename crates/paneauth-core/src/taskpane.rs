//! Taskpane page controller: the user actions wired to the page's buttons.

use std::sync::Arc;

use url::Url;

use crate::dialog;
use crate::host::HostIntegration;
use crate::orchestrator::{FallbackOrchestrator, FlowReport};

/// Where the taskpane writes its user-visible output.
pub trait OutputSink: Send + Sync {
    fn show(&self, text: &str);
}

pub struct Taskpane {
    host: Arc<dyn HostIntegration>,
    orchestrator: FallbackOrchestrator,
    dialog_page: Url,
    output: Arc<dyn OutputSink>,
}

impl Taskpane {
    pub fn new(
        host: Arc<dyn HostIntegration>,
        orchestrator: FallbackOrchestrator,
        dialog_page: Url,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            host,
            orchestrator,
            dialog_page,
            output,
        }
    }

    pub fn orchestrator(&self) -> &FallbackOrchestrator {
        &self.orchestrator
    }

    /// The sign-out buttons are only offered when the host does not broker
    /// sign-in itself.
    pub fn sign_out_visible(&self) -> bool {
        !self.host.supports_nested_app_auth()
    }

    /// Runs the full fallback chain and shows the token or the error.
    pub async fn sign_in(&self) -> FlowReport {
        let report = self.orchestrator.authenticate().await;
        self.output.show(&report.display_text());
        report
    }

    /// Signs in through the dialog relay directly.
    pub async fn sign_in_with_dialog(&self) -> FlowReport {
        let report = self.orchestrator.authenticate_with_dialog().await;
        self.output.show(&report.display_text());
        report
    }

    pub async fn sign_out(&self) {
        match self.orchestrator.gateway().logout_popup().await {
            Ok(()) => self.output.show("Signed out"),
            Err(e) => self.output.show(&e.to_string()),
        }
    }

    /// Opens the dialog in logout mode. Nothing is awaited from it.
    pub async fn sign_out_with_dialog(&self) {
        let url = dialog::logout_url(&self.dialog_page);
        match self.host.display_dialog(&url).await {
            Ok(_handle) => tracing::debug!("logout dialog opened"),
            Err(e) => self.output.show(&e.to_string()),
        }
    }

    /// Shows how many accounts the identity client knows about.
    pub async fn check_signed_in(&self) -> usize {
        match self.orchestrator.gateway().all_accounts().await {
            Ok(accounts) => {
                self.output.show(&accounts.len().to_string());
                accounts.len()
            }
            Err(e) => {
                self.output.show(&e.to_string());
                0
            }
        }
    }
}
