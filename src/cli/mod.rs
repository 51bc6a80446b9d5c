//! CLI argument definitions for xchain.

pub mod commands;
pub mod prompt;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use xc_auth::InteractiveFlow;

/// Sign in to Minecraft services with a Microsoft account
#[derive(Parser, Debug)]
#[command(name = "xchain", version, about)]
pub struct Cli {
    /// Path to a TOML config file (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Azure application client id, overriding the config file
    #[arg(long, global = true, env = "XCHAIN_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Where the credential is stored (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub credentials: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in, silently when a stored credential still works
    Login(LoginArgs),
    /// Show the stored credential
    Status,
    /// Forget the stored credential
    Logout,
}

#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Interactive flow used when silent refresh is not possible
    #[arg(long, value_enum)]
    pub flow: Option<FlowArg>,

    /// Print the authorization URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowArg {
    Device,
    Redirect,
}

impl From<FlowArg> for InteractiveFlow {
    fn from(flow: FlowArg) -> Self {
        match flow {
            FlowArg::Device => InteractiveFlow::Device,
            FlowArg::Redirect => InteractiveFlow::Redirect,
        }
    }
}
