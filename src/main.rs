//! clario-sync - document server and offline-first sync client for Clario

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clario_sync::api;
use clario_sync::config::{self, Config};
use clario_sync::db::Database;
use clario_sync::models::{PendingAction, Priority, Status, Task, TaskDraft, TaskPatch};
use clario_sync::query::{SortOrder, StatusFilter, TaskQuery, TaskStats};
use clario_sync::{HttpGateway, MemoryGateway, RemoteGateway, SyncEngine, SyncOutcome};

#[derive(Parser)]
#[command(name = "clario-sync")]
#[command(about = "Offline-first task sync for Clario")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the document server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Generate a new API token
    Token {
        /// Name/label for the token
        #[arg(short, long)]
        name: Option<String>,

        /// List all configured tokens
        #[arg(long)]
        list: bool,

        /// Revoke a token by name
        #[arg(long)]
        revoke: Option<String>,
    },

    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create a task
    Add {
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long, default_value = "medium")]
        priority: Priority,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due_date: Option<NaiveDate>,

        /// Due time (HH:MM)
        #[arg(long, value_parser = parse_time)]
        due_time: Option<NaiveTime>,
    },

    /// List tasks
    List {
        /// all, pending, completed or overdue
        #[arg(short, long, default_value = "all")]
        filter: StatusFilter,

        /// Search title and description
        #[arg(short, long)]
        search: Option<String>,

        /// newest, oldest, priority or due
        #[arg(long, default_value = "newest")]
        sort: SortOrder,
    },

    /// Edit a task
    Update {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        priority: Option<Priority>,

        /// todo, in-progress or done
        #[arg(short, long)]
        status: Option<Status>,

        #[arg(long)]
        due_date: Option<NaiveDate>,

        #[arg(long, value_parser = parse_time)]
        due_time: Option<NaiveTime>,

        /// Remove the description
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,

        /// Remove the due date and time
        #[arg(long, conflicts_with_all = ["due_date", "due_time"])]
        clear_due: bool,
    },

    /// Mark a task done, or reopen it
    Toggle { id: String },

    /// Delete a task
    Delete { id: String },

    /// Drain pending changes and pull the server's tasks
    Sync,

    /// Show changes waiting for the server
    Pending,

    /// Show progress counters
    Stats,
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| format!("invalid time '{s}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clario_sync=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match cli.command {
        Commands::Serve { port, bind } => {
            let mut cfg = load_config(&config_path)?;

            // Override with CLI args
            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            run_server(cfg).await
        }

        Commands::Token { name, list, revoke } => manage_tokens(&config_path, name, list, revoke),

        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            let cfg = Config::default();
            cfg.save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Generate a token: clario-sync token --name my-device");
            println!(
                "  2. Start the server: clario-sync --config {} serve",
                path.display()
            );
            println!("  3. Point [client] server_url and token at it");

            Ok(())
        }

        command => {
            let cfg = load_config(&config_path)?;
            run_client(cfg, command).await
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load_from(path)
    } else {
        Ok(Config::default())
    }
}

async fn run_server(config: Config) -> Result<()> {
    let db = Database::open(&config.database.path).context("Failed to open database")?;

    if config.tokens.is_empty() {
        tracing::warn!("No API tokens configured; every API request will be rejected");
    }

    let state = api::AppState::new(db, config.clone());
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("clario-sync server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the sync engine from the `[client]` section. The server is probed
/// once; if it answers, the reconnect sequence runs before the command.
async fn open_engine(cfg: &Config) -> Result<SyncEngine> {
    let client = &cfg.client;
    let db = Arc::new(
        Database::open(&client.store_path).context("Failed to open local task store")?,
    );
    if let Some(max_pages) = client.max_pages {
        db.set_page_quota(max_pages)?;
    }

    let (gateway, online): (Arc<dyn RemoteGateway>, bool) = match &client.server_url {
        Some(url) => {
            let gateway = HttpGateway::new(
                url,
                client.token.clone(),
                client.user_id.clone(),
                client.connect_timeout(),
            )?;
            let online = gateway.ping().await;
            if !online {
                tracing::info!(server = %url, "Server unreachable, working offline");
            }
            (Arc::new(gateway), online)
        }
        None => (Arc::new(MemoryGateway::new(client.user_id.clone())), false),
    };

    let engine = SyncEngine::new(db, gateway, online);
    engine.startup_sync().await;
    Ok(engine)
}

async fn run_client(cfg: Config, command: Commands) -> Result<()> {
    let engine = open_engine(&cfg).await?;
    let user_id = cfg.client.user_id.as_str();

    match command {
        Commands::Add {
            title,
            description,
            priority,
            due_date,
            due_time,
        } => {
            let draft = TaskDraft {
                title,
                description,
                priority,
                due_date,
                due_time,
                ..TaskDraft::default()
            };
            let task = engine.create(draft, user_id).await?;
            println!("Created {} {}", task.id, sync_marker(&task));
        }

        Commands::List {
            filter,
            search,
            sort,
        } => {
            let query = TaskQuery {
                status: filter,
                search,
                sort,
            };
            let tasks = query.apply(&engine.tasks());
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in &tasks {
                print_task(task);
            }
        }

        Commands::Update {
            id,
            title,
            description,
            priority,
            status,
            due_date,
            due_time,
            clear_description,
            clear_due,
        } => {
            let patch = TaskPatch {
                title,
                description: clearable(description, clear_description),
                priority,
                status,
                due_date: clearable(due_date, clear_due),
                due_time: clearable(due_time, clear_due),
                ..TaskPatch::default()
            };
            let task = engine.update(&id, patch, user_id).await?;
            println!("Updated {} {}", task.id, sync_marker(&task));
        }

        Commands::Toggle { id } => {
            let task = engine.toggle(&id, user_id).await?;
            println!("{} is now {}", task.id, task.status);
        }

        Commands::Delete { id } => {
            engine.delete(&id, user_id).await?;
            println!("Deleted {}", id);
        }

        Commands::Sync => match engine.sync_now().await? {
            SyncOutcome::Completed { replayed, pulled } => {
                println!("Synced: {replayed} pending change(s) sent, {pulled} task(s) received")
            }
            SyncOutcome::Offline => println!("Offline: changes stay queued until the server is reachable"),
            SyncOutcome::Skipped | SyncOutcome::Idle => println!("Nothing to do"),
        },

        Commands::Pending => {
            let pending = engine.pending();
            if pending.is_empty() {
                println!("No pending changes.");
            }
            for op in &pending {
                let title = match &op.action {
                    PendingAction::Add { task } | PendingAction::Update { task } => task.title.as_str(),
                    PendingAction::Delete { .. } => "",
                };
                println!(
                    "{}  {:<6} {}  {}",
                    op.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    op.action.kind(),
                    op.action.task_id(),
                    title
                );
            }
        }

        Commands::Stats => {
            let stats = TaskStats::of(&engine.tasks());
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Serve { .. } | Commands::Token { .. } | Commands::Init { .. } => {
            anyhow::bail!("not a client command")
        }
    }

    Ok(())
}

/// Patch value for a clearable field: `--clear-*` wins, otherwise a given
/// value is set and an absent one leaves the field alone.
fn clearable<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
    if clear { Some(None) } else { value.map(Some) }
}

fn sync_marker(task: &Task) -> &'static str {
    if task.synced_at.is_some() {
        "(synced)"
    } else {
        "(queued)"
    }
}

fn print_task(task: &Task) {
    let check = match task.status {
        Status::Done => "[x]",
        Status::InProgress => "[~]",
        Status::Todo => "[ ]",
    };
    let due = match (task.due_date, task.due_time) {
        (Some(date), Some(time)) => format!("  due {} {}", date, time.format("%H:%M")),
        (Some(date), None) => format!("  due {}", date),
        _ => String::new(),
    };
    println!(
        "{} {}  {} ({}){}",
        check, task.id, task.title, task.priority, due
    );
    if let Some(description) = &task.description {
        println!("      {}", description);
    }
}

fn manage_tokens(
    config_path: &Path,
    name: Option<String>,
    list: bool,
    revoke: Option<String>,
) -> Result<()> {
    // List tokens
    if list {
        if !config_path.exists() {
            println!("No config file found at {}", config_path.display());
            println!("Run 'clario-sync init' to create one.");
            return Ok(());
        }

        let cfg = Config::load_from(config_path)?;
        if cfg.tokens.is_empty() {
            println!("No tokens configured.");
            println!("Generate one with: clario-sync token --name <device-name>");
        } else {
            println!("Configured tokens:");
            println!();
            for token in &cfg.tokens {
                // Show truncated hash (first 20 chars)
                let hash_preview: String = token.token_hash.chars().take(20).collect();
                println!("  {} - {}...", token.name, hash_preview);
            }
        }
        return Ok(());
    }

    // Revoke token
    if let Some(token_name) = revoke {
        if !config_path.exists() {
            println!("No config file found at {}", config_path.display());
            return Ok(());
        }

        let mut cfg = Config::load_from(config_path)?;
        let original_len = cfg.tokens.len();
        cfg.tokens.retain(|t| t.name != token_name);

        if cfg.tokens.len() == original_len {
            println!("Token '{}' not found.", token_name);
        } else {
            cfg.save_to(config_path)?;
            println!("Revoked token '{}'.", token_name);
        }
        return Ok(());
    }

    // Generate new token
    let token = generate_token();
    let label = name.unwrap_or_else(|| "default".to_string());
    let token_hash = config::hash_token(&token)?;

    if config_path.exists() {
        let mut cfg = Config::load_from(config_path)?;

        if cfg.tokens.iter().any(|t| t.name == label) {
            println!(
                "Token '{}' already exists. Use --revoke first to replace it.",
                label
            );
            return Ok(());
        }

        cfg.tokens.push(config::TokenConfig {
            name: label.clone(),
            token_hash,
        });
        cfg.save_to(config_path)?;

        println!("Generated API token for '{}'\n", label);
        println!("Token: {}\n", token);
    } else {
        println!("Generated API token for '{}':\n", label);
        println!("Token: {}\n", token);
        println!("Add this to your server's config.toml:\n");
        println!("  [[tokens]]");
        println!("  name = \"{}\"", label);
        println!("  token_hash = \"{}\"\n", token_hash);
    }

    println!("Client setup (config.toml):");
    println!("  [client]");
    println!("  server_url = \"http://YOUR_SERVER_IP:3030\"");
    println!("  token = \"{}\"", token);
    println!();
    println!("Save this token now - it cannot be retrieved later!");

    Ok(())
}

fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let token_body: String = bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect();

    format!("cls_{}", token_body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_flags_produce_clearing_patches() {
        assert_eq!(clearable(Some("x"), false), Some(Some("x")));
        assert_eq!(clearable::<&str>(None, false), None);
        assert_eq!(clearable::<&str>(None, true), Some(None));
    }

    #[test]
    fn update_accepts_clear_flags() {
        let cli = Cli::try_parse_from([
            "clario-sync",
            "update",
            "t1",
            "--clear-description",
            "--clear-due",
        ])
        .unwrap();

        let Commands::Update {
            id,
            clear_description,
            clear_due,
            ..
        } = cli.command
        else {
            panic!("expected update command");
        };
        assert_eq!(id, "t1");
        assert!(clear_description);
        assert!(clear_due);
    }

    #[test]
    fn clearing_conflicts_with_setting() {
        assert!(
            Cli::try_parse_from(["clario-sync", "update", "t1", "-d", "x", "--clear-description"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "clario-sync",
                "update",
                "t1",
                "--due-date",
                "2024-01-01",
                "--clear-due"
            ])
            .is_err()
        );
    }

    #[test]
    fn due_time_accepts_hours_and_minutes() {
        assert_eq!(parse_time("09:30"), Ok(NaiveTime::from_hms_opt(9, 30, 0).unwrap()));
        assert!(parse_time("9.30").is_err());
    }
}
