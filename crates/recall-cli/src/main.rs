use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use recall_shared::telemetry::init_telemetry;
use recall_shared::AppConfig;

mod bootstrap;

use bootstrap::Services;

#[derive(Parser, Debug)]
#[command(
    name = "recall",
    version,
    about = "Conversation context and memory tiers"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and indices if missing
    Migrate,

    /// Inspect or reset a user's recent context
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Record one user message and the assistant reply
    Turn {
        #[arg(long)]
        user: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        response: String,
    },

    /// Print the memory history of a session
    History {
        #[arg(long)]
        session: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Case-insensitive search over recorded messages
    Search {
        query: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Search the durable store instead of the in-process history
        #[arg(long)]
        archive: bool,
    },

    /// Apply the retention window now
    Cleanup,

    /// Tier counters and row counts
    Stats,
}

#[derive(Subcommand, Debug)]
enum ContextAction {
    Get {
        #[arg(long)]
        user: String,
    },
    Clear {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load()?;
    init_telemetry(&config.logging)?;
    info!("Configuration loaded");

    let services = Services::init(&config).await?;
    let outcome = run(&services, args.command).await;
    services.shutdown().await;
    outcome
}

async fn run(services: &Services, command: Command) -> Result<()> {
    match command {
        Command::Migrate => {
            services.store()?.ensure_schema().await?;
            println!("schema ready");
        }
        Command::Context { action } => match action {
            ContextAction::Get { user } => {
                let context = services.context()?.get_context(&user).await;
                println!("{}", serde_json::to_string_pretty(&context)?);
            }
            ContextAction::Clear { user } => {
                services.context()?.clear_context(&user).await;
                println!("context cleared for {}", user);
            }
        },
        Command::Turn {
            user,
            message,
            response,
        } => {
            services
                .context()?
                .update_context(&user, &message, &response)
                .await;
            services
                .memory
                .save_turn(&user, &message, &response, None, None)
                .await;
            println!("turn recorded for {}", user);
        }
        Command::History { session, limit } => {
            let history = services
                .memory
                .get_conversation_history(&session, limit)
                .await;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::Search {
            query,
            user,
            limit,
            archive,
        } => {
            let results = if archive {
                services
                    .memory
                    .search_archive(&query, user.as_deref(), limit)
                    .await
            } else {
                if let Some(user) = &user {
                    // populate the in-process history before scanning it
                    services.memory.get_conversation_history(user, None).await;
                }
                services
                    .memory
                    .search_conversations(&query, user.as_deref(), limit)
            };
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Cleanup => {
            let report = services.memory.cleanup().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats => {
            let store = match &services.store {
                Some(store) => Some(store.stats().await?),
                None => None,
            };
            let context = services.context().ok().map(|c| c.stats());
            let distributed = services.distributed.as_ref().map(|c| c.stats());

            let report = json!({
                "context": context,
                "memory": services.memory.stats(),
                "distributed": distributed,
                "store": store,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
