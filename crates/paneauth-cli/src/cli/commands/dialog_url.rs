//! Dialog URL command handler.

use anyhow::Result;
use paneauth_core::account::AccountContext;
use paneauth_core::config::AuthConfig;
use paneauth_core::dialog;

pub struct DialogUrlOptions {
    pub login_hint: Option<String>,
    pub tenant_id: Option<String>,
    pub local_account_id: Option<String>,
    pub logout: bool,
}

pub fn run(config: &AuthConfig, opts: DialogUrlOptions) -> Result<()> {
    let page = config.dialog_url()?;
    let url = if opts.logout {
        dialog::logout_url(&page)
    } else {
        let context = AccountContext {
            login_hint: opts.login_hint,
            tenant_id: opts.tenant_id,
            local_account_id: opts.local_account_id,
        };
        dialog::login_url(&page, &context)?
    };
    println!("{url}");
    Ok(())
}
