//! CLI entry and dispatch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use paneauth_core::config::{self, AuthConfig};
use paneauth_core::logging;

mod commands;

#[derive(Parser)]
#[command(name = "paneauth")]
#[command(version = "0.1")]
#[command(about = "Office add-in token acquisition: config, dialog URLs, flow simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of ${PANEAUTH_HOME}/config.toml
    #[arg(long, global = true, env = "PANEAUTH_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print the dialog page URL the taskpane would open
    DialogUrl {
        /// Login hint to carry in the account context
        #[arg(long)]
        login_hint: Option<String>,

        /// Tenant id to carry in the account context
        #[arg(long)]
        tenant_id: Option<String>,

        /// Local account (object) id to carry in the account context
        #[arg(long)]
        local_account_id: Option<String>,

        /// Open the dialog in logout mode instead
        #[arg(long, conflicts_with_all = ["login_hint", "tenant_id", "local_account_id"])]
        logout: bool,
    },

    /// Run a sign-in against a scripted host and identity provider
    Simulate {
        /// Scenario file (TOML)
        #[arg(value_name = "SCENARIO")]
        scenario: PathBuf,

        /// Sign in through the dialog directly (skip silent, SSO and popup)
        #[arg(long)]
        dialog: bool,

        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    logging::init();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

fn load_config(path: Option<&Path>) -> Result<AuthConfig> {
    let loaded = match path {
        Some(path) => AuthConfig::load_from(path),
        None => AuthConfig::load(),
    };
    loaded.context("load config")
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        config: config_override,
    } = cli;

    match command {
        Commands::Config { command } => {
            let path = config_override.unwrap_or_else(config::paths::config_path);
            match command {
                ConfigCommands::Path => {
                    commands::config::path(&path);
                    Ok(())
                }
                ConfigCommands::Init => commands::config::init(&path),
            }
        }

        Commands::DialogUrl {
            login_hint,
            tenant_id,
            local_account_id,
            logout,
        } => {
            let config = load_config(config_override.as_deref())?;
            commands::dialog_url::run(
                &config,
                commands::dialog_url::DialogUrlOptions {
                    login_hint,
                    tenant_id,
                    local_account_id,
                    logout,
                },
            )
        }

        Commands::Simulate {
            scenario,
            dialog,
            json,
        } => {
            let config = load_config(config_override.as_deref())?;
            commands::simulate::run(config, &scenario, dialog, json).await
        }
    }
}
