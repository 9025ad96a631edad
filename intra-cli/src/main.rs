//! intra: terminal client for a LAN chat server.
//!
//!   intra chat [--open <peer>]        Interactive chat (default)
//!   intra register <user> --password  Create an account
//!   intra login <user> --password     Log in and remember the user name
//!   intra users                       List registered users
//!
//! Server and identity come from flags, then `~/.config/intra/client.toml`,
//! then defaults (`127.0.0.1:8000`, system user name).

mod chat;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use intra_sdk::ConnectionEndpoint;
use intra_sdk::api::ApiClient;

use config::{Config, Resolved};

#[derive(Parser)]
#[command(name = "intra", about = "LAN chat client")]
pub struct Cli {
    /// Chat server host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Chat server port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// User name to connect as
    #[arg(long, global = true)]
    pub identity: Option<String>,

    /// Local message database
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat
    Chat {
        /// Conversation to open on start
        #[arg(long)]
        open: Option<String>,
    },
    /// Create an account
    Register {
        username: String,
        #[arg(long, env = "INTRA_PASSWORD")]
        password: String,
    },
    /// Log in; the user name becomes the default identity
    Login {
        username: String,
        #[arg(long, env = "INTRA_PASSWORD")]
        password: String,
    },
    /// List registered users
    Users,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load();
    let resolved = Resolved::merge(&cli, &config);
    let endpoint = ConnectionEndpoint::new(&resolved.host, resolved.port, &resolved.identity);

    match cli.command {
        None => chat::run(resolved, None).await,
        Some(Command::Chat { open }) => chat::run(resolved, open).await,
        Some(Command::Register { username, password }) => {
            let api = ApiClient::new(endpoint)?;
            api.register(&username, &password).await?;
            println!("Registered {username}. Log in with `intra login {username}`.");
            Ok(())
        }
        Some(Command::Login { username, password }) => {
            let api = ApiClient::new(endpoint)?;
            let session = api.login(&username, &password).await?;
            tracing::info!(username = %session.username, "Logged in");
            Resolved {
                identity: session.username.clone(),
                ..resolved
            }
            .to_config()
            .save();
            println!("Logged in as {}", session.username);
            Ok(())
        }
        Some(Command::Users) => {
            let api = ApiClient::new(endpoint)?;
            for user in api.users().await? {
                println!("{}", user.username);
            }
            Ok(())
        }
    }
}
