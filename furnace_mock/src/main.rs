use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::Parser;
use furnace_acq::{DecodeType, PointSchema};
use furnace_mock::MockServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Simulated furnace register bank (Modbus TCP)")]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, default_value = "5020")]
    port: u16,

    /// Point schema whose read-only points are driven with slowly varying values
    #[clap(long, default_value = "schemas/dual_furnace_zones.toml")]
    schema: PathBuf,

    /// Optional TOML file with `[[registers]]` initial values
    #[clap(long)]
    seed: Option<PathBuf>,

    /// Update period of the simulated values in milliseconds
    #[clap(long, default_value = "1000")]
    tick_ms: u64,

    #[clap(long, default_value = "info")]
    log_level: String,
}

/// Initial value of a point before the first tick.
fn initial_value(name: &str, decode: DecodeType) -> f32 {
    match decode {
        DecodeType::Float32BE if name.contains("setpoint") => 800.0,
        DecodeType::Float32BE if name.contains("vel") => 1450.0,
        DecodeType::Float32BE => 800.0,
        DecodeType::UInt16 | DecodeType::Bool => 1.0,
    }
}

// temperature zones drift between 700 and 900, each with its own phase
fn zone_temperature(elapsed: f32, phase: f32) -> f32 {
    800.0 + 100.0 * (elapsed / 60.0 + phase).sin()
}

fn drive(mock: &MockServer, schema: &PointSchema, elapsed: f32) {
    for (idx, point) in schema.all().iter().enumerate() {
        if point.writable || point.decode != DecodeType::Float32BE {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let phase = idx as f32 * 0.7;
        let value = if point.name.contains("temp") {
            zone_temperature(elapsed, phase)
        } else {
            initial_value(&point.name, point.decode) + 25.0 * (elapsed / 20.0 + phase).sin()
        };
        mock.set_float(point.address, value);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let schema = PointSchema::from_path(&args.schema)
        .with_context(|| format!("loading schema {}", args.schema.display()))?;

    let mock = MockServer::new();
    for point in schema.all() {
        let value = initial_value(&point.name, point.decode);
        match point.decode {
            DecodeType::Float32BE => mock.set_float(point.address, value),
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            DecodeType::UInt16 | DecodeType::Bool => mock.set_word(point.address, value as u16),
        }
    }
    if let Some(seed) = &args.seed {
        let text = std::fs::read_to_string(seed)
            .with_context(|| format!("reading seed {}", seed.display()))?;
        let n = mock.seed_from_toml(&text)?;
        info!(registers = n, "seed applied");
    }

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen address")?;
    info!(%addr, points = schema.len(), version = schema.version(), "starting simulator");

    let server = tokio::spawn(mock.clone().run(addr));

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => drive(&mock, &schema, started.elapsed().as_secs_f32()),
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
        if server.is_finished() {
            break;
        }
    }
    server.abort();
    match server.await {
        Ok(res) => res,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
