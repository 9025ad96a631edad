//! Line-based interactive chat over one SDK session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use intra_sdk::api::ApiClient;
use intra_sdk::store::{ChatRecord, SqliteStore};
use intra_sdk::{ClientConfig, ConnectionEndpoint, Event, SessionHandle};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Resolved;

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Open(String),
    Close,
    File(PathBuf),
    Typing,
    Server { host: String, port: u16 },
    Connect(Option<String>),
    Disconnect,
    Status,
    Help,
    Quit,
    Text(String),
    Empty,
    Invalid(String),
}

fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();
    match (name, rest.as_slice()) {
        ("open", []) => Input::Invalid("usage: /open <peer>".into()),
        // Peer names may contain spaces ("Family Group").
        ("open", peer) => Input::Open(peer.join(" ")),
        ("close", []) => Input::Close,
        ("file", []) => Input::Invalid("usage: /file <path>".into()),
        ("file", path) => Input::File(PathBuf::from(path.join(" "))),
        ("typing", []) => Input::Typing,
        ("server", [host, port]) => match port.parse() {
            Ok(port) => Input::Server {
                host: host.to_string(),
                port,
            },
            Err(_) => Input::Invalid(format!("bad port: {port}")),
        },
        ("server", _) => Input::Invalid("usage: /server <host> <port>".into()),
        ("connect", []) => Input::Connect(None),
        ("connect", [identity]) => Input::Connect(Some(identity.to_string())),
        ("disconnect", []) => Input::Disconnect,
        ("status", []) => Input::Status,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Invalid(format!("unknown command: /{command}")),
    }
}

const HELP: &str = "\
/open <peer>          open a conversation (\"Family Group\" for everyone)
/close                close the conversation
/file <path>          upload and send a file
/typing               tell the peer you are typing
/server <host> <port> switch server
/connect [name]       connect (optionally as another user)
/disconnect           disconnect and stop reconnecting
/status               connection status and who is typing
/quit                 exit
anything else is sent as a message";

struct Chat {
    handle: SessionHandle,
    api: ApiClient,
    settings: Resolved,
    active: Option<String>,
}

pub async fn run(settings: Resolved, open: Option<String>) -> Result<()> {
    if let Some(dir) = settings.db.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let store = Arc::new(SqliteStore::open(&settings.db)?);
    let endpoint = endpoint(&settings);
    let api = ApiClient::new(endpoint.clone())?;
    let (handle, mut events) = intra_sdk::connect(ClientConfig::default(), endpoint, store);
    settings.to_config().save();

    tracing::info!(host = %settings.host, port = settings.port, identity = %settings.identity, "Starting chat");
    let mut chat = Chat {
        handle,
        api,
        settings,
        active: None,
    };
    if let Some(peer) = open {
        chat.open(&peer).await?;
    }
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !chat.handle_input(parse_line(&line)).await? {
                        break;
                    }
                }
                None => break,
            },
            Some(event) = events.recv() => chat.show_event(&event),
        }
    }

    chat.handle.disconnect().await?;
    Ok(())
}

fn endpoint(settings: &Resolved) -> ConnectionEndpoint {
    ConnectionEndpoint::new(&settings.host, settings.port, &settings.identity)
}

impl Chat {
    /// Returns `false` when the user asked to quit.
    async fn handle_input(&mut self, input: Input) -> Result<bool> {
        match input {
            Input::Empty => {}
            Input::Quit => return Ok(false),
            Input::Help => println!("{HELP}"),
            Input::Invalid(msg) => println!("{msg}"),
            Input::Open(peer) => self.open(&peer).await?,
            Input::Close => {
                self.handle.close_conversation().await?;
                self.active = None;
            }
            Input::Status => {
                println!("{}", self.handle.status().await?);
                let typing = self.handle.typing_peers();
                if !typing.is_empty() {
                    println!("typing: {}", typing.join(", "));
                }
            }
            Input::Connect(identity) => {
                if let Some(identity) = identity {
                    self.settings.identity = identity;
                    self.settings.to_config().save();
                }
                self.handle.connect(&self.settings.identity).await?;
            }
            Input::Disconnect => self.handle.disconnect().await?,
            Input::Server { host, port } => {
                self.settings.host = host;
                self.settings.port = port;
                self.settings.to_config().save();
                let endpoint = endpoint(&self.settings);
                self.api.set_endpoint(endpoint.clone());
                self.handle.update_endpoint(endpoint).await?;
            }
            Input::Typing => {
                let Some(peer) = self.active.clone() else {
                    println!("open a conversation first");
                    return Ok(true);
                };
                self.handle.send_typing(&peer).await?;
            }
            Input::Text(text) => {
                let Some(peer) = self.active.clone() else {
                    println!("open a conversation first");
                    return Ok(true);
                };
                if !self.handle.send_text(&peer, &text).await? {
                    println!("(not delivered: {})", self.handle.status().await?);
                }
            }
            Input::File(path) => {
                let Some(peer) = self.active.clone() else {
                    println!("open a conversation first");
                    return Ok(true);
                };
                match self.handle.share_file(&self.api, &peer, &path).await {
                    Ok(true) => {}
                    Ok(false) => println!("(not delivered: {})", self.handle.status().await?),
                    Err(e) => println!("Upload failed: {e}"),
                }
            }
        }
        Ok(true)
    }

    async fn open(&mut self, peer: &str) -> Result<()> {
        let history = self.handle.open_conversation(peer).await?;
        println!("── {peer} ──");
        for record in &history {
            println!("{}", self.format_record(record));
        }
        self.active = Some(peer.to_string());
        Ok(())
    }

    fn show_event(&self, event: &Event) {
        match event {
            Event::StatusChanged { state } => println!("* {state}"),
            Event::Message { record } => println!("{}", self.format_record(record)),
            Event::Typing { peer, is_typing } => {
                if *is_typing && self.active.as_deref() == Some(peer.as_str()) {
                    println!("* {peer} is typing…");
                }
            }
        }
    }

    fn format_record(&self, record: &ChatRecord) -> String {
        let time = chrono::DateTime::from_timestamp_millis(record.timestamp)
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
            .unwrap_or_default();
        let who = if record.is_self { "me" } else { record.sender.as_str() };
        match (&record.file_url, &record.file_name) {
            (Some(url), Some(name)) => {
                let url = format!(
                    "{}{}",
                    endpoint(&self.settings).http_base(),
                    url.trim_start_matches('/')
                );
                format!("[{time}] {who}: Shared File: {name} <{url}>")
            }
            _ => format!("[{time}] {who}: {}", record.text),
        }
    }
}
