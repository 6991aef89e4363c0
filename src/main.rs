use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use quossi::engine::{ChatOutcome, Engine, Summary};
use quossi::memory::{MemoryStore, ScoreRecord, rest::RestStore, sqlite::SqliteStore};

#[derive(Parser)]
#[command(name = "quossi", version, about = "Emotional stability scoring engine")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a message, update the user's memory, and show the summary
    Score {
        /// The message to score
        message: String,

        /// User the score is recorded under
        #[arg(short, long, default_value = "default")]
        user: String,

        /// Optional display nickname to store
        #[arg(long)]
        nickname: Option<String>,

        /// Score without touching memory (no stabilization, no trend)
        #[arg(long)]
        dry_run: bool,
    },

    /// Feed a chat message into the batching state machine
    Chat {
        /// The chat message
        message: String,

        /// User the message belongs to
        #[arg(short, long, default_value = "default")]
        user: String,

        /// Optional display nickname to store
        #[arg(long)]
        nickname: Option<String>,
    },

    /// Show the current trend summary without scoring anything new
    Trend {
        /// User to summarize
        #[arg(short, long, default_value = "default")]
        user: String,
    },

    /// Show recent score records
    History {
        /// User to list
        #[arg(short, long, default_value = "default")]
        user: String,

        /// Number of records
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = quossi::config::AppConfig::load();
    let params = config.engine_params();

    // REST backend wins when configured; SQLite otherwise
    if let Some(rest) = &config.rest {
        log::info!("Store: REST at {}", rest.url);
        let engine = Engine::new(RestStore::new(&rest.url, &rest.api_key), params);
        return run(&engine, cli).await;
    }

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .clone()
        .or(config.db_path.clone())
        .unwrap_or_else(quossi::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let store = SqliteStore::open(&db_path).context("Failed to open database")?;
    let engine = Engine::new(store, params);
    run(&engine, cli).await
}

async fn run<S: MemoryStore>(engine: &Engine<S>, cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Score { message, user, nickname, dry_run } => {
            if dry_run {
                let outcome = quossi::engine::score(&message);
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                } else {
                    println!(
                        "Q-Score {} — {} {} ({}, {}), tone {}",
                        outcome.qscore,
                        outcome.range.emoji,
                        outcome.range.name,
                        outcome.range.archetype,
                        outcome.range.element,
                        outcome.tone
                    );
                }
                return Ok(());
            }
            let summary = engine.evaluate(&user, &message, nickname.as_deref()).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }

        Commands::Chat { message, user, nickname } => {
            let outcome = engine
                .ingest_chat(&user, &message, nickname.as_deref())
                .await
                .context("Chat ingestion failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }
            match outcome {
                ChatOutcome::Queued { count, threshold } => {
                    println!("Queued ({count}/{threshold} messages toward the next score)");
                }
                ChatOutcome::Scored { result } => {
                    println!("Batch threshold reached — scoring the buffered chat:");
                    println!();
                    print_summary(&result);
                }
            }
        }

        Commands::Trend { user } => {
            match engine.trend(&user).await {
                Some(summary) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    } else {
                        print_summary(&summary);
                    }
                }
                None => println!("No history for user \"{user}\"."),
            }
        }

        Commands::History { user, limit } => {
            let records = engine.history(&user, limit).await;
            if records.is_empty() {
                println!("No history for user \"{user}\".");
                return Ok(());
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_history_table(&user, &records);
            }
        }
    }

    Ok(())
}

/// Print a summary in a compact human-readable block.
fn print_summary(s: &Summary) {
    let who = match &s.nickname {
        Some(nick) => format!("{nick} ({})", s.user),
        None => s.user.clone(),
    };
    println!("{who}");
    println!(
        "  Q-Score:    {} — {} {} ({}, {})",
        s.qscore, s.range.emoji, s.range.name, s.range.archetype, s.range.element
    );
    match s.main_qscore {
        Some(main) => println!("  Main score: {main} (weighted over recent history)"),
        None => println!("  Main score: n/a"),
    }
    match s.volatility {
        Some(vol) => println!("  Volatility: {vol}"),
        None => println!("  Volatility: n/a (need 2+ scores)"),
    }
    println!(
        "  Trend:      slope {:+.2}, streak {} x{}",
        s.trend_slope,
        s.streak.direction.as_str(),
        s.streak.length
    );
    println!("  Tone:       {}", s.tone);
    println!();
    println!("  \"{}\"", s.range.motto);
    println!("  {}", s.reflection);
}

/// Print recent records as a table, most recent last.
fn print_history_table(user: &str, records: &[ScoreRecord]) {
    println!("History for {user} ({} records):", records.len());
    println!();
    println!("{:<22} {:>7} {:>12}  {}", "When", "Q-Score", "Tone", "Message");
    println!("{}", "-".repeat(80));

    for r in records {
        // Truncate long messages
        let message: String = if r.message.chars().count() > 34 {
            let head: String = r.message.chars().take(31).collect();
            format!("{head}...")
        } else {
            r.message.clone()
        };

        println!(
            "{:<22} {:>7} {:>12}  {}",
            r.ts.format("%Y-%m-%d %H:%M:%S"),
            r.qscore,
            r.tone.to_string(),
            message
        );
    }

    println!();
    println!("Q-Score bands: Storm 100-199  Ground 200-299  Flow 300-399  Gold 400-499  Sun 500-600");
}
