//! Renamer daemon - rename sessions, atomic commit and delivery
//!
//! This binary runs as a background daemon, accepting uploads from
//! renamer clients and driving one rename session per session key.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! renamerd start
//!
//! # Start the daemon (background/daemonized)
//! renamerd start -d
//!
//! # Start with an explicit config file
//! renamerd start --config ./renamer.toml
//!
//! # Stop the daemon
//! renamerd stop
//!
//! # Check daemon status
//! renamerd status
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use renamerd::config::{state_dir, DaemonConfig};
use renamerd::delivery::DeliveryService;
use renamerd::intake::Intake;
use renamerd::server::{new_clients_map, DaemonServer, SocketTransport};
use renamerd::store::spawn_store;
use renamerd::supervisor::{Supervisor, SupervisorSettings};

/// How long `stop` waits for the daemon to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Renamer daemon - interactive rename sessions
#[derive(Parser, Debug)]
#[command(name = "renamerd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        #[command(flatten)]
        config: ConfigArg,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status {
        #[command(flatten)]
        config: ConfigArg,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ConfigArg {
    /// Config file (defaults to <config dir>/renamer/config.toml)
    #[arg(short, long, env = "RENAMER_CONFIG")]
    config: Option<PathBuf>,
}

impl ConfigArg {
    fn load(&self) -> Result<DaemonConfig> {
        DaemonConfig::load(self.config.as_deref()).context("Invalid configuration")
    }
}

// ============================================================================
// PID File
// ============================================================================

/// `renamerd.pid` under the state directory. The renamer client reads the
/// same file to decide whether to spawn the daemon.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn new() -> Self {
        Self {
            path: state_dir().join("renamerd.pid"),
        }
    }

    fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        fs::write(&self.path, process::id().to_string()).context("Failed to write PID file")
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// PID of a live daemon. A file left by a crashed daemon is removed.
    fn live_pid(&self) -> Option<u32> {
        let pid = self.read()?;
        if process_alive(pid) {
            Some(pid)
        } else {
            self.remove();
            None
        }
    }
}

fn process_alive(pid: u32) -> bool {
    // signal 0 only checks that the process exists
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn send_sigterm(pid: u32) -> Result<()> {
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    false
}

// ============================================================================
// Commands
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    let pid_file = PidFile::new();

    match args.command.unwrap_or(Command::Start {
        daemon: false,
        config: ConfigArg::default(),
    }) {
        Command::Start { daemon, config } => {
            if let Some(pid) = pid_file.live_pid() {
                eprintln!("renamerd already running (PID {pid}); run 'renamerd stop' first");
                process::exit(1);
            }

            // loaded before forking so a bad config reaches the caller's terminal
            let config = config.load()?;
            if daemon {
                daemonize()?;
            }

            pid_file.write()?;
            let result = run_daemon(config);
            pid_file.remove();
            result
        }
        Command::Stop => {
            let Some(pid) = pid_file.live_pid() else {
                println!("renamerd is not running");
                return Ok(());
            };
            println!("Stopping renamerd (PID {pid})...");
            send_sigterm(pid)?;
            if !wait_for_exit(pid, STOP_TIMEOUT) {
                eprintln!("renamerd did not exit within {}s", STOP_TIMEOUT.as_secs());
                process::exit(1);
            }
            println!("Stopped.");
            Ok(())
        }
        Command::Status { config } => {
            let Some(pid) = pid_file.live_pid() else {
                println!("renamerd is not running");
                process::exit(1);
            };
            let config = config.load()?;
            println!("renamerd running (PID {pid})");
            println!("  socket:    {}", config.socket_path.display());
            println!("  downloads: {}", config.downloads_dir.display());
            println!("  outbox:    {}", config.outbox_dir.display());
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = state_dir().join("renamerd.log");

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("renamerd=info".parse()?)
                .add_directive("renamer_core=info".parse()?)
                .add_directive("renamer_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Renamer daemon starting"
    );
    log_config(&config);

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let store = spawn_store(config.max_sessions);
    info!(max_sessions = config.max_sessions, "Session store started");

    let clients = new_clients_map();
    let transport = SocketTransport::new(config.outbox_dir.clone(), Arc::clone(&clients));
    let delivery = DeliveryService::new(Arc::new(transport), config.retry_policy());
    let supervisor = Supervisor::new(store, delivery, SupervisorSettings::from_config(&config));
    let intake = Intake::from_config(&config);

    let server = DaemonServer::new(
        config.socket_path.clone(),
        supervisor,
        intake,
        clients,
        cancel_token,
    );

    info!(socket = %config.socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Renamer daemon stopped");
    Ok(())
}

fn log_config(config: &DaemonConfig) {
    let dir = |p: &Path| p.display().to_string();
    info!(
        downloads = %dir(&config.downloads_dir),
        outbox = %dir(&config.outbox_dir),
        max_file_size_mb = config.max_file_size_mb,
        session_timeout_secs = config.session_timeout_secs,
        max_delivery_rounds = config.max_delivery_rounds,
        "Configuration loaded"
    );
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
