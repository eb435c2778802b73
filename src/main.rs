use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wadesk::auth::{SnapshotLoad, use_backend_auth_state};
use wadesk::config::DeskConfig;
use wadesk::creds::AuthCreds;
use wadesk::store::{FileStore, OutOfTicketStore};
use wadesk::sweeper::sweep_out_of_ticket;

// Maintenance tool for a helpdesk session store.
//
// Usage:
//   wadesk --store ./wadesk-store inspect --session sess1
//   wadesk --store ./wadesk-store sweep --retention-hours 24
//   wadesk --store ./wadesk-store sweep --watch --every-minutes 30

#[derive(Parser)]
#[command(name = "wadesk", about = "Inspect and maintain WhatsApp helpdesk session storage")]
struct Cli {
    /// Root directory of the file store.
    #[arg(long, short = 's', global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a session's persisted credentials, migrating legacy snapshots on the way.
    Inspect {
        #[arg(long)]
        session: String,
    },
    /// Purge out-of-ticket messages past retention, once or on an interval.
    Sweep {
        #[arg(long)]
        retention_hours: Option<u64>,
        /// Keep running and sweep every interval.
        #[arg(long)]
        watch: bool,
        #[arg(long, requires = "watch")]
        every_minutes: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let mut config = DeskConfig::default();
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let backend = Arc::new(FileStore::new(&config.store_path).await?);
        info!("File store opened at {}", config.store_path.display());

        match cli.command {
            Command::Inspect { session } => inspect(&session, backend).await,
            Command::Sweep {
                retention_hours,
                watch,
                every_minutes,
            } => {
                if let Some(hours) = retention_hours {
                    config.out_of_ticket_retention = hours_to_duration(hours);
                }
                if let Some(minutes) = every_minutes {
                    config.sweep_interval = Duration::from_secs(minutes.max(1).saturating_mul(60));
                }

                if watch {
                    info!(
                        "Sweeping every {:?}, retention {:?}",
                        config.sweep_interval, config.out_of_ticket_retention
                    );
                    let store: Arc<dyn OutOfTicketStore> = backend;
                    config.spawn_sweeper(store).await?;
                    return Ok(());
                }

                let purged = sweep_out_of_ticket(
                    backend.as_ref(),
                    config.out_of_ticket_retention,
                    Utc::now(),
                )
                .await?;
                println!("purged {purged} out-of-ticket messages");
                Ok(())
            }
        }
    })
}

fn hours_to_duration(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(60 * 60))
}

async fn inspect(session: &str, backend: Arc<FileStore>) -> anyhow::Result<()> {
    let state = use_backend_auth_state::<AuthCreds, _>(session, backend).await?;

    match state.load_outcome() {
        SnapshotLoad::Fresh => {
            warn!("No credentials stored for {session}");
            println!("session {session}: not paired");
            return Ok(());
        }
        SnapshotLoad::Restored => {}
        SnapshotLoad::Migrated { salvaged, dropped } => {
            println!("session {session}: migrated legacy keys ({salvaged} moved, {dropped} dropped)");
        }
    }

    let creds = state.creds.read().await;
    println!("session {session}");
    println!("  registered:       {}", creds.registered);
    println!(
        "  account:          {}",
        creds.me.as_ref().map(|m| m.id.as_str()).unwrap_or("-")
    );
    println!("  registration id:  {}", creds.registration_id);
    println!("  next pre-key id:  {}", creds.next_pre_key_id);
    println!("  platform:         {}", creds.platform.as_deref().unwrap_or("-"));
    Ok(())
}
