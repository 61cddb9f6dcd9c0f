//! Dialog-side entry point.
//!
//! The dialog page is its own page instance with its own (standard) gateway.
//! Redirect sign-in is a navigation round trip, so the page runs twice: the
//! first load starts the redirect, the reload after the identity provider
//! returns relays the result to the opener.

use std::sync::Arc;

use url::Url;

use crate::account::AccountContext;
use crate::dialog::{DialogLaunch, DialogMessage};
use crate::error::AuthFailure;
use crate::gateway::PublicClientGateway;
use crate::host::{HostError, ParentChannel};
use crate::request::TokenRequestBuilder;

/// What a page load of the dialog did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStep {
    /// Logout redirect started; nothing is relayed
    LoggedOut,
    /// A message was sent to the opener
    Relayed(DialogMessage),
    /// Login redirect started; the page will reload
    RedirectStarted,
}

pub struct DialogRelay {
    gateway: Arc<PublicClientGateway>,
    parent: Arc<dyn ParentChannel>,
    builder: TokenRequestBuilder,
    redirect_uri: Url,
}

impl DialogRelay {
    /// `redirect_uri` is the dialog page itself, so the provider returns here.
    pub fn new(
        gateway: Arc<PublicClientGateway>,
        parent: Arc<dyn ParentChannel>,
        builder: TokenRequestBuilder,
        redirect_uri: Url,
    ) -> Self {
        Self {
            gateway,
            parent,
            builder,
            redirect_uri,
        }
    }

    pub fn gateway(&self) -> &Arc<PublicClientGateway> {
        &self.gateway
    }

    /// Handles one load of the dialog page at `page_url`.
    ///
    /// # Errors
    /// Returns an error only if relaying a message to the opener fails.
    pub async fn on_load(&self, page_url: &Url) -> Result<RelayStep, HostError> {
        let context = match DialogLaunch::from_url(page_url) {
            DialogLaunch::Logout => {
                return match self.gateway.logout_redirect().await {
                    Ok(()) => {
                        tracing::debug!("dialog logout redirect started");
                        Ok(RelayStep::LoggedOut)
                    }
                    Err(e) => self.relay_failure(&e).await,
                };
            }
            DialogLaunch::Login { context } => context,
        };

        match self.gateway.handle_redirect_result().await {
            Ok(Some(result)) => {
                if let Err(e) = self.gateway.set_active_account(result.account.clone()).await {
                    tracing::warn!("could not mark relayed account active: {e}");
                }
                self.relay(DialogMessage::token(result.access_token)).await
            }
            Err(e) => self.relay_failure(&e).await,
            Ok(None) => match self.start_login(context.as_ref()).await {
                Ok(()) => Ok(RelayStep::RedirectStarted),
                Err(e) => self.relay_failure(&e).await,
            },
        }
    }

    async fn start_login(
        &self,
        context: Option<&AccountContext>,
    ) -> Result<(), AuthFailure> {
        let request = self
            .builder
            .build(&self.gateway, context)
            .await?
            .with_redirect_uri(self.redirect_uri.as_str());
        tracing::debug!("dialog starting login redirect");
        self.gateway.login_redirect(&request).await
    }

    async fn relay_failure(&self, failure: &AuthFailure) -> Result<RelayStep, HostError> {
        tracing::warn!("dialog sign-in failed: {failure}");
        self.relay(DialogMessage::error(failure.kind.name())).await
    }

    async fn relay(&self, message: DialogMessage) -> Result<RelayStep, HostError> {
        self.parent.message_parent(&message.to_json()).await?;
        Ok(RelayStep::Relayed(message))
    }
}
