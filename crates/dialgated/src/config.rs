//! Daemon command line. Every flag falls back to an environment variable.

use std::net::SocketAddr;

use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug, Clone)]
#[command(name = "dialgated")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Outbound calls with answering-machine detection", long_about = None)]
pub struct Args {
    /// Address to serve webhooks and the call API on
    #[arg(long, env = "DIALGATE_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Emit JSON-formatted log lines
    #[arg(long, env = "DIALGATE_LOG_JSON")]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Default log level when `RUST_LOG` is unset.
    pub fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}
