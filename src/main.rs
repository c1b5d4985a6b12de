//! messenger-cli - Lightweight chatbot client for the Refinitiv Messenger API
//!
//! Authenticates against the RDP OAuth2 token service, talks to the
//! Messenger bot REST API, and can hold a live chatroom stream open with
//! proactive token renewal.

mod api;
mod auth;
mod config;
mod models;
mod stream;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{chat, MessengerClient};
use crate::auth::{StoreError, TokenManager, TokenStore};
use crate::config::Config;

#[derive(Parser)]
#[command(name = "messenger-cli")]
#[command(about = "Lightweight CLI chatbot client for the Refinitiv Messenger API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config template to fill in with bot credentials
    Init,

    /// Authenticate and cache the token for later commands
    Login,

    /// Show cached token status (no network call)
    Status,

    /// Clear the cached token
    Logout,

    /// List chatrooms associated with the bot account
    Rooms,

    /// Send a 1:1 message to a contact
    Send {
        /// Recipient's Messenger account email
        #[arg(short, long)]
        to: String,

        /// Message content
        message: String,
    },

    /// Post a message to a chatroom (joins it first)
    Post {
        /// Chatroom ID (from `rooms` output)
        #[arg(short, long)]
        room: String,

        /// Message content
        message: String,
    },

    /// Leave a joined chatroom
    Leave {
        /// Chatroom ID
        room: String,
    },

    /// Connect to the chatroom stream and answer messages
    Listen {
        /// Chatroom ID; defaults to the first associated chatroom
        #[arg(short, long)]
        room: Option<String>,
    },
}

/// Manager for REST commands: persisted cache, default safety margin.
fn rest_manager(config: &Config) -> Result<Arc<TokenManager>> {
    let store = TokenStore::new(Config::token_cache_path()?);
    let manager =
        TokenManager::new(config.auth_settings(), store).context("Authentication setup failed")?;
    Ok(Arc::new(manager))
}

fn rest_client(config: &Config) -> Result<MessengerClient> {
    Ok(MessengerClient::new(
        config.api_url(),
        rest_manager(config)?,
        true,
    ))
}

fn print_status() -> Result<()> {
    let store = TokenStore::new(Config::token_cache_path()?);
    match store.load() {
        Ok(cred) if !cred.is_expired() => {
            println!("Access token: valid");
            println!("  expires_at: {}", cred.expires_at);
        }
        Ok(_) => {
            println!("Access token: expired (renews with its refresh token on next use)");
        }
        Err(StoreError::NotFound) => {
            println!("Access token: none");
            println!("\nRun 'messenger-cli login' to authenticate.");
        }
        Err(e) => {
            println!("Access token: unreadable ({})", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Init => {
            let path = Config::init()?;
            println!("Wrote config template to {}", path.display());
            println!("Fill in your bot credentials, then run 'messenger-cli login'.");
        }
        Commands::Login => {
            let config = Config::load()?;
            let manager = rest_manager(&config)?;
            let cred = manager
                .get_token(true)
                .await
                .context("Authentication failed")?;
            println!("Login successful (token expires_at={}).", cred.expires_at);
        }
        Commands::Status => {
            print_status()?;
        }
        Commands::Logout => {
            TokenStore::new(Config::token_cache_path()?)
                .clear()
                .context("Failed to clear token cache")?;
            println!("Logged out.");
        }
        Commands::Rooms => {
            let config = Config::load()?;
            let client = rest_client(&config)?;
            let rooms = chat::list_chatrooms(&client)
                .await
                .context("Chatroom operation failed")?;
            if rooms.is_empty() {
                println!("No chatrooms associated with this account.");
            }
            for room in rooms {
                println!("{}  {}", room.chatroom_id, room.name.as_deref().unwrap_or(""));
            }
        }
        Commands::Send { to, message } => {
            let config = Config::load()?;
            let client = rest_client(&config)?;
            chat::send_direct_message(&client, &to, &message)
                .await
                .context("Chatroom operation failed")?;
            println!("Sent 1:1 message to {}", to);
        }
        Commands::Post { room, message } => {
            let config = Config::load()?;
            let client = rest_client(&config)?;
            chat::join_chatroom(&client, &room)
                .await
                .context("Chatroom operation failed")?;
            chat::post_to_chatroom(&client, &room, &message)
                .await
                .context("Chatroom operation failed")?;
            println!("Posted to chatroom {}", room);
        }
        Commands::Leave { room } => {
            let config = Config::load()?;
            let client = rest_client(&config)?;
            chat::leave_chatroom(&client, &room)
                .await
                .context("Chatroom operation failed")?;
            println!("Left chatroom {}", room);
        }
        Commands::Listen { room } => {
            let config = Config::load()?;
            stream::run(&config, room).await.context("Streaming failed")?;
        }
    }

    Ok(())
}
