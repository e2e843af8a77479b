use std::path::PathBuf;

use clap::Parser;

/// Process configuration (§6): the declarative document at `--config` is the
/// single source of truth for everything except where to bind.
#[derive(Parser)]
#[command(name = "gproxy")]
pub(crate) struct Cli {
    #[arg(long, default_value = "config.yaml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "0.0.0.0")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 8080)]
    pub(crate) port: u16,
}
