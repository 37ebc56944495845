use anyhow::{Context, Result};
use cantun::config::{DebugOptions, TunnelConfig};
use cantun::{CanWorker, UdpWorker};
use clap::{Parser, ValueEnum};
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Tunnel CAN frames over UDP between two hosts"
)]
struct Cli {
    /// Local UDP bind address and port.
    #[arg(short, long, default_value = "0.0.0.0:20000")]
    local: SocketAddr,

    /// Remote peer address and port. Datagrams from any other source IP are
    /// dropped.
    #[arg(short, long)]
    remote: SocketAddr,

    /// CAN interface to attach to.
    #[arg(short, long, default_value = "can0")]
    iface: String,

    /// Flush timeout for the outbound UDP buffer, in milliseconds.
    #[arg(short, long, default_value_t = 100)]
    timeout: u64,

    /// Extra debug logging, comma separated (visible at RUST_LOG=debug).
    #[arg(short, long, value_delimiter = ',', value_enum)]
    debug: Vec<DebugFlag>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DebugFlag {
    /// Frame pool growth and shutdown buffer statistics.
    Buffer,
    /// Flush timer expirations.
    Timer,
    /// Received datagrams.
    Udp,
    /// Individual CAN frames.
    Can,
}

fn debug_options(flags: &[DebugFlag]) -> DebugOptions {
    DebugOptions {
        buffer: flags.contains(&DebugFlag::Buffer),
        timer: flags.contains(&DebugFlag::Timer),
        udp: flags.contains(&DebugFlag::Udp),
        can: flags.contains(&DebugFlag::Can),
    }
}

fn main() -> Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();

    let cli = Cli::parse();
    let config = TunnelConfig {
        local_addr: cli.local,
        remote_addr: cli.remote,
        can_interface: cli.iface,
        flush_timeout: Duration::from_millis(cli.timeout),
        debug: debug_options(&cli.debug),
    };

    let udp = Arc::new(UdpWorker::new(&config).with_context(|| {
        format!("bind UDP socket to {}", config.local_addr)
    })?);
    let can = Arc::new(CanWorker::new(&config).with_context(|| {
        format!("open CAN interface {}", config.can_interface)
    })?);

    udp.attach_can_worker(&can);
    can.attach_udp_worker(&udp);
    udp.start().context("start UDP worker")?;
    can.start().context("start CAN worker")?;

    static QUIT: AtomicBool = AtomicBool::new(false);
    ctrlc::set_handler(|| {
        QUIT.store(true, Ordering::Relaxed);
    })
    .context("set signal handler")?;

    info!(
        "tunnel up: {} <-> {} via {}",
        config.local_addr, config.remote_addr, config.can_interface
    );
    while !QUIT.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    can.stop();
    udp.stop();
    Ok(())
}
