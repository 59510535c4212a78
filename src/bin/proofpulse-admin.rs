use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proofpulse::config::{Config, DatabaseBackend};
use proofpulse::storage::{PostgresStorage, SqliteStorage, Storage};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "proofpulse-admin")]
#[command(about = "ProofPulse website and notification management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage websites
    Website {
        #[command(subcommand)]
        command: WebsiteCommands,
    },
    /// Manage notifications
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },
    /// Inspect engagement stats
    Stats {
        #[command(subcommand)]
        command: StatsCommands,
    },
}

#[derive(Subcommand)]
enum WebsiteCommands {
    /// Register a website and print its API key
    Create {
        /// Display name
        name: String,
        /// Domain the widget is embedded on
        domain: String,
    },
}

#[derive(Subcommand)]
enum NotificationCommands {
    /// Create a notification for a website
    Create {
        website_id: String,
        message: String,
    },
    /// Show a notification's impression and click counters
    Show { notification_id: String },
}

#[derive(Subcommand)]
enum StatsCommands {
    /// Show the last stored engagement snapshot for a website
    Show { website_id: String },
}

fn random_hex(bytes: usize) -> String {
    use rand::RngExt;
    let mut rng = rand::rng();
    (0..bytes)
        .map(|_| format!("{:02x}", rng.random::<u8>()))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::Website {
            command: WebsiteCommands::Create { name, domain },
        } => {
            let id = random_hex(8);
            let api_key = format!("pp_{}", random_hex(24));
            let website = storage
                .create_website(&id, &name, &domain, &api_key)
                .await
                .context("failed to create website")?;

            println!("✓ Created website '{}' ({})", website.name, website.domain);
            println!("  id:      {}", website.id);
            println!("  api key: {}", website.api_key);
        }
        Commands::Notification {
            command: NotificationCommands::Create { website_id, message },
        } => {
            if storage.get_website(&website_id).await?.is_none() {
                anyhow::bail!("website '{}' does not exist", website_id);
            }

            let id = random_hex(8);
            let notification = storage
                .create_notification(&id, &website_id, &message)
                .await
                .context("failed to create notification")?;

            println!(
                "✓ Created notification '{}' for website '{}'",
                notification.id, notification.website_id
            );
        }
        Commands::Notification {
            command: NotificationCommands::Show { notification_id },
        } => match storage.get_notification(&notification_id).await? {
            Some(n) => {
                println!("{:<12} {}", "Id", n.id);
                println!("{:<12} {}", "Website", n.website_id);
                println!("{:<12} {}", "Message", n.message);
                println!("{:<12} {}", "Impressions", n.impressions);
                println!("{:<12} {}", "Clicks", n.clicks);
            }
            None => println!("⚠ Notification '{}' not found", notification_id),
        },
        Commands::Stats {
            command: StatsCommands::Show { website_id },
        } => match storage.get_website_stats(&website_id).await? {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => println!("No stats recorded yet for website '{}'", website_id),
        },
    }

    Ok(())
}
