//! CLI command handlers
//!
//! The `connect` command runs a session without peer transfers or a share:
//! a broker that never listens and a responder that never matches.

use crate::hub::{
    ClientContext, ConnectionBroker, HubConfig, HubEvent, HubSession, PeerConnect, SearchHit,
    SearchResponder,
};
use crate::net::{now_ms, HubClient};
use crate::protocol::cipher::make_key;
use crate::protocol::codec::{escape, unescape};
use crate::protocol::search::{SearchQuery, SearchRequest, FILE_TYPE_ANY};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Peer side of a console session: passive, never opens peer sockets
pub struct OfflineBroker;

impl ConnectionBroker for OfflineBroker {
    fn port(&self) -> u16 {
        0
    }

    fn secure_port(&self) -> u16 {
        0
    }

    fn tls_ok(&self) -> bool {
        false
    }

    fn is_active(&self) -> bool {
        false
    }

    fn local_ip(&self) -> String {
        "0.0.0.0".to_string()
    }

    fn expect(&self, _nick: &str, _my_nick: &str, _hub_url: &str, _expires: u64) -> bool {
        false
    }

    fn connect(&self, request: PeerConnect) {
        log::info!(
            "Ignoring peer connection to {}:{} ({:?})",
            request.server,
            request.port,
            request.role
        );
    }

    fn nat_port(&self) -> u16 {
        0
    }
}

/// Empty share; prints results of our own searches
pub struct EmptyShare;

impl SearchResponder for EmptyShare {
    fn search(&self, _request: &SearchRequest) -> Vec<SearchHit> {
        Vec::new()
    }

    fn udp_port(&self) -> u16 {
        0
    }

    fn free_slots(&self) -> u16 {
        0
    }

    fn send_udp(&self, _ip: &str, _port: u16, _data: Vec<u8>) {}

    fn on_search_result(&self, line: &str) {
        println!("🔎 {}", line.replace('\x05', " | "));
    }
}

/// Print the `$Key` answer for a lock.
pub fn cmd_key(lock: &str) -> CliResult<()> {
    let key = make_key(lock.as_bytes());
    if key.is_empty() {
        return Err(format!("lock must be 3 to 512 bytes, got {}", lock.len()).into());
    }
    println!("🔑 Key ({} bytes)", key.len());
    println!("   ├─ Text: {}", String::from_utf8_lossy(&key));
    println!("   └─ Hex:  {}", hex::encode(&key));
    Ok(())
}

pub fn cmd_escape(text: &str) -> CliResult<()> {
    println!("{}", escape(text));
    Ok(())
}

pub fn cmd_unescape(text: &str) -> CliResult<()> {
    println!("{}", unescape(text));
    Ok(())
}

/// Write a config file with defaults for everything but address and nick.
pub fn cmd_init_config(path: &Path, address: &str, nick: &str) -> CliResult<()> {
    if path.exists() {
        println!("⚠️  Config already exists at {:?}", path);
        return Ok(());
    }
    let config = HubConfig {
        address: address.to_string(),
        nick: nick.to_string(),
        ..HubConfig::default()
    };
    config.validate()?;
    config.save(path)?;
    println!("✅ Config written to {:?}", path);
    println!("   🌐 Hub: {}", config.hub_url());
    println!("   👤 Nick: {}", config.nick);
    Ok(())
}

/// One-line rendering of an event, `None` for noise
pub fn format_event(event: &HubEvent) -> Option<String> {
    let line = match event {
        HubEvent::Connected => "🔌 Connected".to_string(),
        HubEvent::LoggedIn => "✅ Logged in".to_string(),
        HubEvent::Disconnected(reason) => format!("❌ Disconnected: {}", reason),
        HubEvent::NickError(err) => format!("⚠️  Nick refused: {:?}", err),
        HubEvent::GetPassword => "🔐 Hub wants a password: /pass <password>".to_string(),
        HubEvent::BadPassword => "⚠️  Wrong password".to_string(),
        HubEvent::Redirect(target) => format!("➡️  Redirected to {}", target),
        HubEvent::HubFull => "⚠️  Hub is full".to_string(),
        HubEvent::HubUpdated { name, description } if description.is_empty() => {
            format!("🏠 {}", name)
        }
        HubEvent::HubUpdated { name, description } => format!("🏠 {} - {}", name, description),
        HubEvent::HubTopic(topic) => format!("📌 {}", topic),
        HubEvent::OperatorLogin => "🛡️  Operator rights granted".to_string(),
        HubEvent::UserUpdated(_) | HubEvent::UserRemoved(_) | HubEvent::UserCommand(_) => {
            return None
        }
        HubEvent::Message(msg) => {
            let from = match &msg.reply_to {
                Some(reply_to) if *reply_to != msg.from => format!("{} (via {})", msg.from, reply_to),
                _ => msg.from.clone(),
            };
            match (&msg.reply_to, msg.third_person, msg.from_hub) {
                (_, _, true) => msg.text.clone(),
                (Some(_), true, _) => format!("[pm] * {} {}", from, msg.text),
                (Some(_), false, _) => format!("[pm] <{}> {}", from, msg.text),
                (None, true, _) => format!("* {} {}", from, msg.text),
                (None, false, _) => format!("<{}> {}", from, msg.text),
            }
        }
        HubEvent::StatusMessage { spam: true, .. } => return None,
        HubEvent::StatusMessage { text, .. } => format!("ℹ️  {}", text),
        HubEvent::FloodDetected(what) => format!("🚫 Flood: {}", what),
    };
    Some(line)
}

/// A console input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Chat(String),
    Me(String),
    Private { to: String, text: String },
    Search(String),
    Password(String),
    Users,
    Bans,
    Quit,
    Unknown(String),
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        let Some(cmd) = line.strip_prefix('/') else {
            return Some(Self::Chat(line.to_string()));
        };
        let (name, rest) = cmd.split_once(' ').unwrap_or((cmd, ""));
        let input = match name {
            "me" if !rest.is_empty() => Self::Me(rest.to_string()),
            "pm" | "msg" => match rest.split_once(' ') {
                Some((to, text)) if !to.is_empty() && !text.is_empty() => Self::Private {
                    to: to.to_string(),
                    text: text.to_string(),
                },
                _ => Self::Unknown(line.to_string()),
            },
            "search" if !rest.is_empty() => Self::Search(rest.to_string()),
            "pass" if !rest.is_empty() => Self::Password(rest.to_string()),
            "users" => Self::Users,
            "bans" => Self::Bans,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(input)
    }
}

/// Apply one console line; false means quit.
fn handle_input(session: &HubSession, context: &ClientContext, input: ConsoleInput) -> bool {
    match input {
        ConsoleInput::Chat(text) => session.hub_message(&text, false),
        ConsoleInput::Me(text) => session.hub_message(&text, true),
        ConsoleInput::Private { to, text } => session.private_message(&to, &text, false),
        ConsoleInput::Search(text) => {
            let query = SearchQuery {
                filter: text,
                size: None,
                file_type: FILE_TYPE_ANY,
            };
            if !session.search(&query, None, now_ms()) {
                println!("⏳ Search not sent (not logged in or too soon)");
            }
        }
        ConsoleInput::Password(password) => session.password(&password, true),
        ConsoleInput::Users => {
            let directory = session.directory();
            let (normal, ops, bots) = directory.counts();
            println!(
                "👥 {} users ({} ops, {} bots), {} bytes shared",
                normal + ops + bots,
                ops,
                bots,
                directory.bytes_shared()
            );
            println!("   {}", directory.nicks().join(" "));
        }
        ConsoleInput::Bans => {
            let report = context.ban_report(now_ms());
            if report.is_empty() {
                println!("No bans");
            } else {
                print!("{}", report);
            }
        }
        ConsoleInput::Quit => return false,
        ConsoleInput::Unknown(line) => println!("❓ Unknown command: {}", line),
    }
    true
}

/// Connect to a hub and run an interactive console until `/quit` or Ctrl-C.
pub async fn cmd_connect(config: HubConfig) -> CliResult<()> {
    config.validate()?;
    println!("🌐 Connecting to {} as {}", config.hub_url(), config.nick);

    let context = Arc::new(ClientContext::new(config.anti_flood.ban_time_secs));
    let (client, mut events) = HubClient::new(
        config,
        context.clone(),
        Arc::new(OfflineBroker),
        Arc::new(EmptyShare),
    );
    let session = client.session();
    let (stop_tx, stop_rx) = watch::channel(false);
    let transport = tokio::spawn(client.run(stop_rx));

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(line) = format_event(&event) {
                        println!("{}", line);
                    }
                }
                None => break,
            },
            line = stdin.next_line() => match line? {
                Some(line) => {
                    let Some(input) = ConsoleInput::parse(&line) else {
                        continue;
                    };
                    if !handle_input(&session, &context, input) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.set_auto_reconnect(false);
    let _ = stop_tx.send(true);
    transport.await?;

    let summary = context.diagnostics.summary();
    if !summary.is_empty() {
        log::info!("Unknown hub commands:\n{}", summary);
    }
    println!("👋 Bye");
    Ok(())
}
