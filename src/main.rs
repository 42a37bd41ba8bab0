#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use iris_gateway::server;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "iris-gateway", about = "Configuration-driven reverse proxy / edge gateway")]
struct Cli {
    /// Path to the JSON routing configuration
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Address the configured ports are bound on
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Admin API listen address (health/metrics); disabled when omitted
    #[arg(long)]
    admin_listen: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::worker_threads();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        bind: cli.bind,
        admin_listen: cli.admin_listen,
        check: cli.check,
    }))
}
