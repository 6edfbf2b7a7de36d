use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "phmd", version, about = "Persistence health monitor daemon", long_about = None)]
pub struct Args {
    /// Detach from the controlling terminal and run in the background
    #[arg(short, long)]
    pub detach: bool,

    /// Start the per-application disk quota monitor
    #[arg(short, long)]
    pub monitor: bool,

    /// Daemon settings file (TOML)
    #[arg(short, long, env = "PERS_PHM_SETTINGS")]
    pub config: Option<PathBuf>,
}
