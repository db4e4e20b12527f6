use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleetwarden::{
    config::{Config, StorageConfig, read_config_file},
    monitors::HealthMonitor,
    notify::{EmailNotifier, Notifier, NotifierSet, WebhookNotifier},
    storage::{
        AlertQuery, AlertStore, Device, DeviceRegistry, OsFamily, StorageError,
        memory::MemoryBackend,
    },
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Fleet health monitor")]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// More log output (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Monitor the fleet until interrupted (default)
    Run,

    /// Manage the device registry
    #[command(subcommand)]
    Devices(DeviceCommand),

    /// Inspect and resolve persisted alerts
    #[command(subcommand)]
    Alerts(AlertCommand),
}

#[derive(Debug, Clone, Subcommand)]
enum DeviceCommand {
    List,
    Add {
        host: String,
        token: String,
        #[arg(long, default_value = "linux")]
        os: OsFamily,
    },
    Remove {
        host: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum AlertCommand {
    List {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        unseen: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Mark alerts as seen
    Ack {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Delete resolved alerts
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

fn init(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetwarden", level),
        ("fleetwarden_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

struct Storage {
    registry: Arc<dyn DeviceRegistry>,
    alerts: Arc<dyn AlertStore>,
}

async fn open_storage(config: &StorageConfig) -> anyhow::Result<Storage> {
    match config {
        StorageConfig::None => {
            warn!("using in-memory storage, alerts will not survive a restart");
            let backend = Arc::new(MemoryBackend::new());
            Ok(Storage {
                registry: backend.clone(),
                alerts: backend,
            })
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = Arc::new(
                fleetwarden::storage::sqlite::SqliteBackend::new(path)
                    .await
                    .with_context(|| format!("failed to open database {}", path.display()))?,
            );
            Ok(Storage {
                registry: backend.clone(),
                alerts: backend,
            })
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested, but built without the storage-sqlite feature")
        }
    }
}

/// Add the devices listed in the config file to the registry
async fn seed_devices(registry: &dyn DeviceRegistry, devices: &[Device]) -> anyhow::Result<()> {
    for device in devices {
        match registry.add_device(device.clone()).await {
            Ok(()) => info!("registered device {}", device.host),
            Err(StorageError::DuplicateDevice(host)) => {
                debug!("device {host} already registered")
            }
            Err(e) => return Err(e).context("failed to register configured devices"),
        }
    }
    Ok(())
}

fn build_notifier(config: &Config) -> anyhow::Result<NotifierSet> {
    let mut notifiers = NotifierSet::new();

    if let Some(email) = &config.email {
        let email = EmailNotifier::new(email)?;
        if email.is_enabled() {
            notifiers = notifiers.with(Arc::new(email));
        }
    }

    if let Some(webhook) = &config.webhook {
        notifiers = notifiers.with(Arc::new(WebhookNotifier::new(webhook)));
    }

    if notifiers.is_empty() {
        warn!("no notifier configured, alerts are only persisted");
    }

    Ok(notifiers)
}

async fn run(config: Config, storage: Storage) -> anyhow::Result<()> {
    seed_devices(storage.registry.as_ref(), &config.devices).await?;

    let notifier: Arc<dyn Notifier> = Arc::new(build_notifier(&config)?);
    let monitor = HealthMonitor::new(&config, storage.registry, storage.alerts, notifier)?;
    let handle = monitor.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    handle.stop().await;

    Ok(())
}

async fn devices(command: DeviceCommand, registry: &dyn DeviceRegistry) -> anyhow::Result<()> {
    match command {
        DeviceCommand::List => {
            let devices = registry.list_devices().await?;
            for device in &devices {
                println!("{:<40} {}", device.host, device.os);
            }
            println!("{} device(s)", devices.len());
        }
        DeviceCommand::Add { host, token, os } => {
            let mut device = Device::new(host, token);
            device.os = os;
            registry.add_device(device).await?;
            println!("device added");
        }
        DeviceCommand::Remove { host } => {
            if registry.remove_device(&host).await? {
                println!("device {host} removed");
            } else {
                anyhow::bail!("unknown device {host}");
            }
        }
    }
    Ok(())
}

async fn alerts(command: AlertCommand, store: &dyn AlertStore) -> anyhow::Result<()> {
    match command {
        AlertCommand::List {
            host,
            unseen,
            limit,
        } => {
            let query = AlertQuery {
                host,
                only_unseen: unseen,
                limit,
            };
            for alert in store.list_alerts(query).await? {
                println!(
                    "{:>6} {} {:<8} {}{} {}",
                    alert.id,
                    alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                    alert.severity.as_str(),
                    alert.host,
                    if alert.seen { "" } else { " *" },
                    alert.content
                );
            }
        }
        AlertCommand::Ack { ids } => {
            let updated = store.mark_seen(&ids).await?;
            println!("{updated} alert(s) marked as seen");
        }
        AlertCommand::Delete { ids } => {
            let deleted = store.delete_alerts(&ids).await?;
            println!("{deleted} alert(s) deleted");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    dotenv::dotenv().ok();

    let config = read_config_file(&args.file)?;
    let storage = open_storage(&config.storage).await?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, storage).await,
        Command::Devices(command) => devices(command, storage.registry.as_ref()).await,
        Command::Alerts(command) => alerts(command, storage.alerts.as_ref()).await,
    }
}
