use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notification_relay::app::config::{TransportConfig, TransportKind};
use notification_relay::app::Config;
use notification_relay::hook::{self, HookMessage};
use notification_relay::peer;
use notification_relay::relay::{NotificationCodec, PermissionGate, RelayManager, StaticGate};
use notification_relay::transport::{self, PeerTarget};

/// Notification Relay - forwards device notifications to a desktop peer
#[derive(Parser)]
#[command(name = "notification-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Config file (defaults to ~/.config/notification-relay/config.toml)
    #[arg(short, long, env = "NOTIFICATION_RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Serve(TransportArgs),
    /// Report a notification event to a running relay
    Notify {
        /// Hook socket (defaults to the configured one)
        #[arg(long)]
        socket: Option<PathBuf>,
        #[command(subcommand)]
        action: NotifyAction,
    },
    /// Connect as the desktop peer and print relayed notifications
    Peer(PeerArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Rfcomm,
    Tcp,
    Unix,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Rfcomm => TransportKind::Rfcomm,
            TransportArg::Tcp => TransportKind::Tcp,
            TransportArg::Unix => TransportKind::Unix,
        }
    }
}

#[derive(Args)]
struct TransportArgs {
    /// Transport to listen on
    #[arg(long, value_enum, env = "NOTIFICATION_RELAY_TRANSPORT")]
    transport: Option<TransportArg>,
    /// TCP listen address
    #[arg(long)]
    tcp_addr: Option<String>,
    /// Unix socket path
    #[arg(long)]
    unix_path: Option<PathBuf>,
    /// Fixed RFCOMM channel
    #[arg(long)]
    rfcomm_channel: Option<u16>,
}

impl TransportArgs {
    fn apply(self, config: &mut TransportConfig) {
        if let Some(kind) = self.transport {
            config.kind = kind.into();
        }
        if let Some(addr) = self.tcp_addr {
            config.tcp_addr = addr;
        }
        if let Some(path) = self.unix_path {
            config.unix_path = path;
        }
        if self.rfcomm_channel.is_some() {
            config.rfcomm_channel = self.rfcomm_channel;
        }
    }
}

#[derive(Subcommand)]
enum NotifyAction {
    /// A notification was posted or updated
    Posted {
        /// Notification key
        #[arg(long)]
        key: String,
        /// Package of the notifying app
        #[arg(long)]
        package: String,
        /// App name shown on the desktop
        #[arg(long)]
        app_label: Option<String>,
        #[arg(long)]
        sender: Option<String>,
        /// Notification text
        #[arg(long)]
        content: Option<String>,
        /// PNG icon file
        #[arg(long)]
        icon_path: Option<PathBuf>,
        /// Reply action token
        #[arg(long)]
        reply_handle: Option<String>,
    },
    /// A notification was withdrawn
    Removed {
        #[arg(long)]
        key: String,
    },
}

#[derive(Args)]
struct PeerArgs {
    /// TCP address of the relay
    #[arg(long, conflicts_with_all = ["unix", "rfcomm"])]
    tcp: Option<String>,
    /// Unix socket path of the relay
    #[arg(long, conflicts_with = "rfcomm")]
    unix: Option<PathBuf>,
    /// Bluetooth address of the device
    #[arg(long)]
    rfcomm: Option<String>,
    /// RFCOMM channel of the device
    #[arg(long, default_value_t = 1)]
    channel: u8,
}

impl PeerArgs {
    fn target(self, config: &TransportConfig) -> Result<PeerTarget> {
        if let Some(addr) = self.tcp {
            return Ok(PeerTarget::Tcp(addr));
        }
        if let Some(path) = self.unix {
            return Ok(PeerTarget::Unix(path));
        }
        if let Some(address) = self.rfcomm {
            return Ok(PeerTarget::Rfcomm {
                address,
                channel: self.channel,
            });
        }
        match config.kind {
            TransportKind::Tcp => Ok(PeerTarget::Tcp(config.tcp_addr.clone())),
            TransportKind::Unix => Ok(PeerTarget::Unix(config.unix_path.clone())),
            TransportKind::Rfcomm => anyhow::bail!("--rfcomm <ADDRESS> is required for Bluetooth"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    match cli.command {
        Some(Commands::Notify { socket, action }) => {
            let socket_path = socket.unwrap_or_else(|| config.hook.socket_path.clone());
            handle_notify(&socket_path, action)
        }
        Some(Commands::Peer(args)) => {
            init_logging(&config.log_level, None)?;
            let target = args.target(&config.transport)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_peer(target, &config))
        }
        Some(Commands::Serve(args)) => {
            args.apply(&mut config.transport);
            init_logging(&config.log_level, config.log_file.as_deref())?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve(config))
        }
        None => {
            init_logging(&config.log_level, config.log_file.as_deref())?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve(config))
        }
    }
}

fn handle_notify(socket_path: &Path, action: NotifyAction) -> Result<()> {
    let message = match action {
        NotifyAction::Posted {
            key,
            package,
            app_label,
            sender,
            content,
            icon_path,
            reply_handle,
        } => {
            let icon_path = icon_path.map(|path| std::fs::canonicalize(&path).unwrap_or(path));
            HookMessage::Posted {
                key,
                package,
                app_label,
                sender,
                content,
                icon_path,
                reply_handle,
            }
        }
        NotifyAction::Removed { key } => HookMessage::Removed { key },
    };

    match hook::send_hook_message(socket_path, &message) {
        Ok(()) => Ok(()),
        Err(e) => {
            // No socket means the relay is not running; nothing to report to
            if socket_path.exists() {
                eprintln!("Warning: Failed to deliver notification: {:#}", e);
            }
            Ok(())
        }
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

fn permission_gate(config: &TransportConfig) -> Arc<dyn PermissionGate> {
    #[cfg(feature = "rfcomm")]
    {
        if config.kind == TransportKind::Rfcomm {
            return Arc::new(transport::rfcomm::AdapterGate);
        }
    }
    Arc::new(StaticGate::new(config.permission_granted))
}

async fn serve(config: Config) -> Result<()> {
    let binder = transport::binder_from_config(&config.transport)?;
    let sink = hook::sink_from_config(&config.reply)?;
    let manager = RelayManager::new(
        &config.relay,
        config.service.clone(),
        binder.clone(),
        permission_gate(&config.transport),
        sink,
    );
    info!(
        transport = %binder.describe(),
        service = %config.service.name,
        uuid = %config.service.uuid,
        "Notification relay starting"
    );

    let (hook_tx, hook_rx) = mpsc::channel::<HookMessage>(100);
    let socket_path = config.hook.socket_path.clone();
    let listener = tokio::spawn(async move {
        if let Err(e) = hook::run_listener(&socket_path, hook_tx).await {
            tracing::error!("Hook listener error: {:#}", e);
        }
    });
    let dispatcher = tokio::spawn(hook::dispatch_loop(
        manager.clone(),
        hook_rx,
        config.relay.clone(),
    ));

    let shutdown = CancellationToken::new();
    let supervisor = if config.relay.reactivate_delay_secs > 0 {
        let delay = Duration::from_secs(config.relay.reactivate_delay_secs);
        Some(tokio::spawn(manager.clone().supervise(delay, shutdown.clone())))
    } else {
        if let Err(e) = manager.activate().await {
            tracing::warn!("Session not activated: {}", e);
        }
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    shutdown.cancel();
    if let Some(supervisor) = supervisor {
        let _ = supervisor.await;
    }
    manager.shutdown().await;
    listener.abort();
    dispatcher.abort();

    if config.hook.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.hook.socket_path) {
            tracing::warn!("Failed to remove hook socket: {}", e);
        }
    }
    Ok(())
}

async fn run_peer(target: PeerTarget, config: &Config) -> Result<()> {
    let channel = transport::connect(&target)
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;
    info!(%target, "Connected to device");

    let codec = NotificationCodec::new(config.relay.framing, config.relay.max_frame_len);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    peer::run_peer(channel, &codec, stdin, tokio::io::stdout()).await
}
