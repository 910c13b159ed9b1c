//! cross-post - Publish one post to many providers

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use libcrosspost::credentials::{CredentialStore, DbCredentialStore};
use libcrosspost::logging::LoggingConfig;
use libcrosspost::scheduling::parse_schedule;
use libcrosspost::service::posting::{GeneratedMediaRequest, SubmitRequest, Submission};
use libcrosspost::types::User;
use libcrosspost::{Config, CrosspostError, CrosspostService, PostStatus, Result};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "cross-post")]
#[command(version)]
#[command(about = "Publish one post to many social providers")]
#[command(long_about = "\
cross-post - Publish one post to many social providers

DESCRIPTION:
    cross-post submits a post through the quota and media checks, then
    publishes it to every selected provider at once (or schedules it for
    the cross-send daemon). Each provider succeeds or fails on its own;
    the post ends SUCCESS, PARTIAL or FAILED.

COMMANDS:
    submit          Publish now or schedule a post
    abort           Stop an in-flight post
    status          Show a post and its per-provider outcomes
    register-media  Record an uploaded or generated media asset
    link            Link a provider account for a user
    add-user        Create a user (owner of posts and notifications)
    notifications   List a user's notifications

USAGE EXAMPLES:
    # Publish to X and LinkedIn
    cross-post submit --user u1 -p x,linkedin \"Shipping today\"

    # Read content from stdin, publish in two hours
    echo \"Release notes\" | cross-post submit --user u1 -p x --at 2h

    # Check how it went
    cross-post status <POST_ID> --format json

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Override with CROSSPOST_CONFIG or --config.

EXIT CODES:
    0 - Success (a PARTIAL post is a success)
    1 - Publishing failed on every provider, or a runtime error
    2 - Authentication error
    3 - Invalid input, media validation failure or quota exceeded
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, env = "CROSSPOST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish now or schedule a post
    Submit {
        /// Content to post (reads from stdin if not provided)
        content: Option<String>,

        /// Owning user
        #[arg(short, long, env = "CROSSPOST_USER")]
        user: String,

        /// Target provider(s), comma-separated or repeated
        #[arg(short, long = "provider", value_delimiter = ',', required = true)]
        providers: Vec<String>,

        /// Registered media asset id(s), in display order
        #[arg(short, long = "media", value_delimiter = ',')]
        media: Vec<String>,

        /// Publish later: "2h", "tomorrow 9am" or an RFC 3339 instant
        #[arg(long)]
        at: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Stop an in-flight post
    Abort {
        post_id: String,
    },

    /// Show a post and its per-provider outcomes
    Status {
        post_id: String,

        /// Include the outcome transition history
        #[arg(long)]
        history: bool,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Record a media asset already in the object store
    RegisterMedia {
        #[arg(short, long, env = "CROSSPOST_USER")]
        user: String,

        /// Object store key
        #[arg(long)]
        key: String,

        #[arg(long)]
        file_name: String,

        #[arg(long)]
        mime: String,

        /// Size in bytes
        #[arg(long)]
        size: u64,

        /// Asset came from the media generator (counts against quota)
        #[arg(long)]
        generated: bool,
    },

    /// Link a provider account for a user
    Link {
        #[arg(short, long, env = "CROSSPOST_USER")]
        user: String,

        provider: String,

        #[arg(long)]
        account_id: String,

        /// Access token (reads from stdin if not provided)
        #[arg(long)]
        token: Option<String>,
    },

    /// Create a user
    AddUser {
        id: String,

        #[arg(long)]
        username: String,

        #[arg(long)]
        email: Option<String>,
    },

    /// List a user's notifications
    Notifications {
        #[arg(short, long, env = "CROSSPOST_USER")]
        user: String,

        /// Only unread notifications
        #[arg(long)]
        unread: bool,

        /// Mark the listed notifications read
        #[arg(long)]
        mark_read: bool,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    if !cli.verbose && std::env::var(libcrosspost::logging::LEVEL_ENV).is_err() {
        logging.level = "error".to_string();
    }
    logging.verbose = cli.verbose;
    logging.init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let service = CrosspostService::from_config(config).await?;

    match cli.command {
        Commands::Submit {
            content,
            user,
            providers,
            media,
            at,
            format,
        } => {
            check_format(&format)?;
            let content = match content {
                Some(content) => content,
                None => read_stdin()?,
            };
            let scheduled_at = at
                .map(|expr| parse_schedule(&expr, chrono::Utc::now()))
                .transpose()?;
            let submission = service
                .posting()
                .submit(SubmitRequest {
                    owner_id: user,
                    content,
                    providers,
                    media_ids: media,
                    scheduled_at,
                })
                .await?;
            print_submission(&submission, &format)?;
            Ok(if submission.status == PostStatus::Failed { 1 } else { 0 })
        }
        Commands::Abort { post_id } => {
            let report = service.posting().abort(&post_id).await?;
            if report.cancelled.is_empty() {
                println!("Nothing to cancel");
            } else {
                println!("Cancelled: {}", report.cancelled.join(", "));
            }
            if let Some(status) = report.status {
                println!("Post {} is {}", post_id, status);
            }
            Ok(0)
        }
        Commands::Status {
            post_id,
            history,
            format,
        } => {
            check_format(&format)?;
            cmd_status(&service, &post_id, history, &format).await?;
            Ok(0)
        }
        Commands::RegisterMedia {
            user,
            key,
            file_name,
            mime,
            size,
            generated,
        } => {
            let asset = if generated {
                service
                    .posting()
                    .register_generated_media(GeneratedMediaRequest {
                        owner_id: user,
                        storage_key: key,
                        file_name,
                        mime_type: mime,
                        size_bytes: size,
                    })
                    .await?
            } else {
                service
                    .posting()
                    .register_media(&user, &key, &file_name, &mime, size)
                    .await?
            };
            println!("{}", asset.id);
            Ok(0)
        }
        Commands::Link {
            user,
            provider,
            account_id,
            token,
        } => {
            let token = match token {
                Some(token) => token,
                None => read_stdin()?,
            };
            DbCredentialStore::new(service.database().clone())
                .link(&user, &provider, &account_id, token.trim())
                .await?;
            println!("Linked {} account {} for {}", provider, account_id, user);
            Ok(0)
        }
        Commands::AddUser {
            id,
            username,
            email,
        } => {
            service
                .database()
                .insert_user(&User {
                    id: id.clone(),
                    username,
                    email,
                    created_at: chrono::Utc::now().timestamp(),
                })
                .await?;
            println!("{}", id);
            Ok(0)
        }
        Commands::Notifications {
            user,
            unread,
            mark_read,
            format,
        } => {
            check_format(&format)?;
            let notifications = service.notifications().list(&user, unread).await?;
            if format == "json" {
                println!("{}", to_json(&notifications)?);
            } else if notifications.is_empty() {
                println!("No notifications");
            } else {
                for n in &notifications {
                    let marker = if n.read { " " } else { "*" };
                    println!("{} {} [{}] {}", marker, n.id, n.kind.as_str(), n.message);
                }
            }
            if mark_read {
                for n in notifications.iter().filter(|n| !n.read) {
                    service.notifications().mark_read(&user, &n.id).await?;
                }
            }
            Ok(0)
        }
    }
}

fn check_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(CrosspostError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(CrosspostError::InvalidInput(
            "No content provided. Pass it as an argument or pipe it via stdin".to_string(),
        ));
    }
    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .map_err(|e| CrosspostError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
    Ok(buffer.trim_end().to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CrosspostError::InvalidInput(format!("Failed to encode output: {}", e)))
}

fn print_submission(submission: &Submission, format: &str) -> Result<()> {
    let outcomes = submission
        .report
        .as_ref()
        .map(|r| r.outcomes.clone())
        .unwrap_or_default();

    if format == "json" {
        let value = json!({
            "post_id": submission.post_id,
            "status": submission.status,
            "outcomes": outcomes,
        });
        println!("{}", to_json(&value)?);
        return Ok(());
    }

    println!("{} {}", submission.post_id, submission.status);
    for outcome in &outcomes {
        match (&outcome.external_id, &outcome.error_message) {
            (Some(id), _) => println!("  {}: {} ({})", outcome.provider, outcome.status, id),
            (None, Some(message)) => {
                println!("  {}: {} - {}", outcome.provider, outcome.status, message)
            }
            (None, None) => println!("  {}: {}", outcome.provider, outcome.status),
        }
    }
    Ok(())
}

async fn cmd_status(
    service: &CrosspostService,
    post_id: &str,
    history: bool,
    format: &str,
) -> Result<()> {
    let tracker = service.orchestrator().tracker();
    let post = tracker.get_post(post_id).await?;
    let outcomes = tracker.outcomes(post_id).await?;
    let events = if history {
        service.database().list_outcome_events(post_id).await?
    } else {
        Vec::new()
    };

    if format == "json" {
        let mut value = json!({ "post": post, "outcomes": outcomes });
        if history {
            value["events"] = json!(events);
        }
        println!("{}", to_json(&value)?);
        return Ok(());
    }

    println!("{} {}", post.id, post.status);
    println!("  {}", post.excerpt(60));
    for outcome in &outcomes {
        println!(
            "  {}: {} (attempts: {}){}",
            outcome.provider,
            outcome.status,
            outcome.attempts,
            outcome
                .error_message
                .as_deref()
                .map(|m| format!(" - {}", m))
                .unwrap_or_default()
        );
    }
    for event in &events {
        println!("  [{}] {} -> {}", event.recorded_at, event.provider, event.status);
    }
    Ok(())
}
