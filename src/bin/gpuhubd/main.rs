use clap::Parser;
mod cli;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::GpuHubd::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(args.verbose.tracing_level_filter().to_string())
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = gpuhub::config::load_config(args.config.as_ref())?;

    // CLI flag overrides the config file
    if let Some(listen) = args.listen.as_deref() {
        let (host, port) = listen
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--listen expects host:port"))?;
        config.daemon.host = host.to_string();
        config.daemon.port = port.parse()?;
    }

    server::run(config).await
}
