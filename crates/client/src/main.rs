mod walk;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use craft_net::{Client, ClientConfig, ServerMessage};

use walk::{CircleWalk, chunk_of, neighbourhood};

#[derive(Parser)]
#[command(name = "craft-client")]
#[command(about = "Headless craft client that walks a circle and logs server traffic")]
struct Args {
    #[arg(default_value = craft_net::DEFAULT_HOST)]
    host: String,

    #[arg(default_value_t = craft_net::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 200)]
    steps: u32,

    #[arg(short, long, default_value_t = 50)]
    interval_ms: u64,

    #[arg(short, long, default_value_t = 40.0)]
    radius: f32,

    #[arg(long, default_value_t = 32.0)]
    height: f32,

    #[arg(long, help = "Chat line to send once the walk is done")]
    say: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut client = Client::new(ClientConfig::default())?;
    client.enable();
    client
        .connect(&args.host, args.port)
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;
    client.start()?;

    let walk = CircleWalk {
        radius: args.radius,
        height: args.height,
        steps: args.steps,
    };
    let interval = Duration::from_millis(args.interval_ms);
    let mut loaded = None;

    for step in 0..args.steps {
        let pose = walk.pose(step);

        let chunk = chunk_of(pose.position);
        if loaded != Some(chunk) {
            for (p, q) in neighbourhood(chunk.0, chunk.1) {
                client.send_chunk_request(p, q)?;
            }
            loaded = Some(chunk);
        }

        let p = pose.position;
        client.send_position(p.x, p.y, p.z, pose.yaw, pose.pitch)?;

        drain_messages(&client);
        client.check_receiver().context("connection lost")?;
        thread::sleep(interval);
    }

    if let Some(text) = &args.say {
        client.send_talk(text)?;
        thread::sleep(interval);
        drain_messages(&client);
    }

    client.stop()?;

    let stats = client.stats();
    log::info!(
        "sent {} lines ({} bytes), suppressed {} positions, received {} bytes",
        stats.lines_sent,
        stats.bytes_sent,
        stats.positions_suppressed,
        stats.bytes_received
    );
    Ok(())
}

fn drain_messages(client: &Client) {
    loop {
        match client.poll_message() {
            Ok(Some(message)) => log_message(&message),
            Ok(None) => break,
            Err(e) => log::warn!("skipping malformed line: {}", e),
        }
    }
}

fn log_message(message: &ServerMessage) {
    match message {
        ServerMessage::You { id, pose } => {
            log::info!("joined as player {} at {}", id, pose.position);
        }
        ServerMessage::Position { id, pose } => {
            log::debug!("player {} at {}", id, pose.position);
        }
        ServerMessage::Block { p, q, x, y, z, w } => {
            log::debug!("block ({}, {}, {}) in chunk ({}, {}) = {}", x, y, z, p, q, w);
        }
        ServerMessage::Disconnect { id } => log::info!("player {} left", id),
        ServerMessage::Talk { id, text } => log::info!("<{}> {}", id, text),
        ServerMessage::Unknown(line) => log::debug!("unhandled line: {}", line),
    }
}
