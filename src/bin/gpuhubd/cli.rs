use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gpuhubd", author, version, about = "GPU cluster control plane daemon")]
pub struct GpuHubd {
    /// The configuration file to use
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the listen address (host:port)
    #[arg(short, long)]
    pub listen: Option<String>,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}
