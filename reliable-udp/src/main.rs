//! Entry point for `reliable-udp`.
//!
//! A line-echo harness over the library: the **server** accepts one
//! connection and echoes an announced number of messages back; the **client**
//! sends a file line by line, checks every echo and prints round-trip
//! statistics.  `main.rs` owns only process setup (logging, argument
//! parsing) and the harness loops.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use reliable_udp::config::debug_level_filter;
use reliable_udp::packet::MAX_PAYLOAD;
use reliable_udp::{Config, Connection};

/// Seed shared by both ends so lossy runs are reproducible.
const DEFAULT_SEED: u64 = 352;

/// Reliable, ordered byte stream over UDP: echo harness.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept one connection and echo the announced number of messages.
    Server {
        /// Local UDP port.
        #[arg(short = 'l', long)]
        port: u16,
        #[command(flatten)]
        common: Common,
    },
    /// Send a file line by line to an echo server and verify the echoes.
    Client {
        /// Destination host address.
        #[arg(short, long)]
        destination: IpAddr,
        /// Remote UDP port.
        #[arg(short = 'p', long)]
        port: u16,
        /// Local UDP port (0 picks one).
        #[arg(short = 'l', long, default_value_t = 0)]
        local_port: u16,
        /// File to echo; standard input when omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args)]
struct Common {
    /// Verbosity, 0 (quiet) to 5 (every frame).
    #[arg(short = 'x', long, default_value_t = 0)]
    debug_level: u8,
    /// Probability of discarding an inbound frame.
    #[arg(short = 'z', long, default_value_t = 0.0)]
    drop_prob: f64,
    /// Seed for sequence numbers and drop decisions.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
    /// Segments in flight before `send` waits.
    #[arg(short, long, default_value_t = reliable_udp::config::DEFAULT_WINDOW)]
    window: usize,
}

impl Common {
    fn config(&self) -> Config {
        Config {
            window: self.window,
            drop_probability: self.drop_prob,
            seed: Some(self.seed),
            debug_level: self.debug_level,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match &cli.mode {
        Mode::Server { common, .. } | Mode::Client { common, .. } => common.debug_level,
    };
    // RUST_LOG, when set, overrides the level given on the command line.
    env_logger::Builder::new()
        .filter_level(debug_level_filter(level))
        .parse_default_env()
        .init();

    match cli.mode {
        Mode::Server { port, common } => run_server(port, common.config()).await,
        Mode::Client {
            destination,
            port,
            local_port,
            file,
            common,
        } => {
            let text = match &file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("error opening file {}", path.display()))?,
                None => std::io::read_to_string(std::io::stdin()).context("reading stdin")?,
            };
            let lines: Vec<&str> = text.split_inclusive('\n').collect();
            let server = SocketAddr::new(destination, port);
            run_client(server, local_port, &lines, common.config()).await
        }
    }
}

async fn run_server(port: u16, config: Config) -> Result<()> {
    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let mut conn = Connection::bind_with_config(local, config).await?;
    log::info!("server listening on {}", conn.local_addr());

    let peer = conn.accept().await?;
    log::info!("server accepted {peer}");

    let announced = conn.receive(MAX_PAYLOAD).await?;
    let count: usize = std::str::from_utf8(&announced)
        .context("line count is not UTF-8")?
        .trim()
        .parse()
        .context("line count is not a number")?;
    println!("server -- will echo {count} lines");

    for remaining in (0..count).rev() {
        let message = conn.receive(MAX_PAYLOAD).await?;
        if message.is_empty() {
            bail!("peer closed with {} lines still to echo", remaining + 1);
        }
        conn.send(&message).await?;
        log::debug!("server -- echoed {} bytes, {remaining} lines to go", message.len());
    }

    conn.close().await?;
    println!("server -- done");
    Ok(())
}

async fn run_client(server: SocketAddr, local_port: u16, lines: &[&str], config: Config) -> Result<()> {
    if lines.is_empty() {
        bail!("nothing to echo");
    }
    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port);
    let mut conn = Connection::bind_with_config(local, config).await?;

    let started = Instant::now();
    conn.connect(server).await?;
    conn.send(lines.len().to_string().as_bytes()).await?;

    let mut rtts = Vec::with_capacity(lines.len());
    let mut mismatches = 0usize;
    for (i, line) in lines.iter().enumerate() {
        let sent_at = Instant::now();
        conn.send(line.as_bytes()).await?;

        let mut echo = Vec::with_capacity(line.len());
        while echo.len() < line.len() {
            let chunk = conn.receive(line.len() - echo.len()).await?;
            if chunk.is_empty() {
                bail!("server closed after {i} of {} lines", lines.len());
            }
            echo.extend_from_slice(&chunk);
        }
        rtts.push(sent_at.elapsed());

        if echo != line.as_bytes() {
            log::warn!("line {} echoed differently", i + 1);
            mismatches += 1;
        }
    }
    let total = started.elapsed();
    conn.close().await?;

    let min = rtts.iter().min().copied().unwrap_or_default();
    let max = rtts.iter().max().copied().unwrap_or_default();
    let avg = rtts.iter().sum::<Duration>() / rtts.len() as u32;
    println!(
        "client: echoed {} messages in {:.3} ms, min/max/avg RTT (ms) {:.4}/{:.4}/{:.4}",
        lines.len(),
        ms(total),
        ms(min),
        ms(max),
        ms(avg)
    );
    if conn.dropped_frames() > 0 {
        println!("client: simulator dropped {} inbound frames", conn.dropped_frames());
    }

    if mismatches > 0 {
        bail!("{mismatches} of {} lines came back corrupted", lines.len());
    }
    println!("client: all echoes matched");
    Ok(())
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
