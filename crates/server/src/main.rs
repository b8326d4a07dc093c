mod config;
mod events;
mod server;
mod world;

use anyhow::{Context, Result};
use clap::Parser;

use config::ServerConfig;
use server::RelayServer;

#[derive(Parser)]
#[command(name = "craft-server")]
#[command(about = "Line-protocol relay server for craft clients")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = craft_net::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        max_clients: args.max_clients,
        ..Default::default()
    };

    let mut server = RelayServer::bind(&bind_addr, config)
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    log::info!("Server started on {}", server.local_addr()?);
    server.run()?;
    log::info!("Server shutting down");

    Ok(())
}
