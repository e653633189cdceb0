//! NMDC hub session state machine
//!
//! One [`HubSession`] per hub connection. The transport feeds it raw lines in
//! arrival order via [`HubSession::on_line`]; handlers update the user
//! directory, talk to the collaborators and queue outgoing lines on the
//! outbox channel. Session scalar state sits behind one mutex that is only
//! held for read-modify-write steps, never across a send.

use crate::flood::{FloodGuard, Verdict};
use crate::hub::config::HubConfig;
use crate::hub::context::ClientContext;
use crate::hub::events::{DisconnectReason, HubEvent};
use crate::hub::handlers::{self, Handler, Line};
use crate::hub::nick_rule::{self, NickRule};
use crate::hub::services::{ConnectionBroker, SearchResponder};
use crate::protocol::codec::{parse_line, ParsedLine};
use crate::protocol::command::OutCommand;
use crate::users::UserDirectory;
use bitflags::bitflags;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bounds for hub-imposed search intervals, in milliseconds
pub const MIN_SEARCH_INTERVAL_MS: u64 = 2_000;
pub const MAX_SEARCH_INTERVAL_MS: u64 = 120_000;

/// How long a NAT-traversal partner stays pending
pub const NAT_PENDING_MS: u64 = 60_000;

/// How long the broker waits for a peer we asked to connect
pub const EXPECT_TIMEOUT_MS: u64 = 45_000;

/// Ban table and counter sweep period
const SWEEP_INTERVAL_MS: u64 = 60_000;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Connected, waiting for `$Lock`
    Protocol,
    /// Key sent, waiting for `$Hello`
    Identify,
    /// Logged in
    Normal,
    Disconnected,
}

bitflags! {
    /// Features announced in the hub's `$Supports`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HubSupports: u16 {
        const USER_COMMAND = 0x01;
        const NO_GET_INFO = 0x02;
        const USER_IP2 = 0x04;
        const NICK_RULE = 0x08;
        const SEARCH_RULE = 0x10;
        const TTHS = 0x20;
    }
}

impl HubSupports {
    pub fn parse(param: &str) -> Self {
        param
            .split(' ')
            .filter_map(|tok| match tok {
                "UserCommand" => Some(Self::USER_COMMAND),
                "NoGetINFO" => Some(Self::NO_GET_INFO),
                "UserIP2" => Some(Self::USER_IP2),
                "NickRule" => Some(Self::NICK_RULE),
                "SearchRule" => Some(Self::SEARCH_RULE),
                "TTHS" => Some(Self::TTHS),
                _ => None,
            })
            .collect()
    }
}

/// A NAT-traversal peer we are waiting on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNat {
    pub nick: String,
    pub local_port: u16,
    pub expires: u64,
}

/// Scalar state guarded by the session mutex
#[derive(Debug)]
pub(crate) struct SessionState {
    pub state: State,
    pub closed: bool,
    pub my_nick: String,
    /// Replacement nick for the next login attempt
    pub retry_nick: Option<String>,
    pub logged_in_fired: bool,
    pub supports: HubSupports,
    pub password: String,
    pub salt: Option<String>,
    pub auto_reconnect: bool,
    pub nick_rule: Option<NickRule>,
    pub search_interval_ms: u64,
    pub search_interval_passive_ms: u64,
    pub last_search: u64,
    pub hub_name: String,

    // presence
    pub description: String,
    pub share_bytes: i64,
    pub away: bool,
    pub last_myinfo: String,
    pub last_update: Option<u64>,
    pub pending_update: Option<u64>,
    pub last_mode: Option<char>,

    // connect negotiation
    pub pending_nat: Option<PendingNat>,
    pub mirrored: HashSet<String>,

    pub last_sweep: u64,
}

impl SessionState {
    fn new(config: &HubConfig) -> Self {
        Self {
            state: State::Protocol,
            closed: false,
            my_nick: nick_rule::sanitize_nick(&config.nick),
            retry_nick: None,
            logged_in_fired: false,
            supports: HubSupports::empty(),
            password: config.password.clone(),
            salt: None,
            auto_reconnect: true,
            nick_rule: None,
            search_interval_ms: MIN_SEARCH_INTERVAL_MS,
            search_interval_passive_ms: MIN_SEARCH_INTERVAL_MS,
            last_search: 0,
            hub_name: String::new(),
            description: config.description.clone(),
            share_bytes: config.share_bytes,
            away: false,
            last_myinfo: String::new(),
            last_update: None,
            pending_update: None,
            last_mode: None,
            pending_nat: None,
            mirrored: HashSet::new(),
            last_sweep: 0,
        }
    }
}

/// Clamp a hub-supplied search interval.
pub fn clamp_search_interval(ms: u64) -> u64 {
    ms.clamp(MIN_SEARCH_INTERVAL_MS, MAX_SEARCH_INTERVAL_MS)
}

/// One hub connection
pub struct HubSession {
    pub(crate) config: HubConfig,
    pub(crate) hub_url: String,
    pub(crate) context: Arc<ClientContext>,
    pub(crate) directory: UserDirectory,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) broker: Arc<dyn ConnectionBroker>,
    pub(crate) responder: Arc<dyn SearchResponder>,
    pub(crate) connect_guard: FloodGuard,
    pub(crate) search_guard: FloodGuard,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedSender<HubEvent>,
    handlers: HashMap<&'static str, Handler>,
}

impl HubSession {
    pub fn new(
        config: HubConfig,
        context: Arc<ClientContext>,
        broker: Arc<dyn ConnectionBroker>,
        responder: Arc<dyn SearchResponder>,
        outbox: mpsc::UnboundedSender<Vec<u8>>,
        events: mpsc::UnboundedSender<HubEvent>,
    ) -> Self {
        let hub_url = config.hub_url();
        let directory = UserDirectory::new(&hub_url, context.registry.clone());
        let connect_guard = FloodGuard::new(context.tcp_bans.clone(), config.anti_flood);
        let search_guard = FloodGuard::new(context.udp_bans.clone(), config.anti_flood);
        let state = Mutex::new(SessionState::new(&config));

        Self {
            config,
            hub_url,
            context,
            directory,
            state,
            broker,
            responder,
            connect_guard,
            search_guard,
            outbox,
            events,
            handlers: handlers::table(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn my_nick(&self) -> String {
        self.state.lock().my_nick.clone()
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn supports(&self) -> HubSupports {
        self.state.lock().supports
    }

    pub fn hub_name(&self) -> String {
        self.state.lock().hub_name.clone()
    }

    pub fn pending_nat(&self) -> Option<PendingNat> {
        self.state.lock().pending_nat.clone()
    }

    pub fn auto_reconnect(&self) -> bool {
        self.state.lock().auto_reconnect
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.state.lock().auto_reconnect = enabled;
    }

    /// Search interval for the given mode, already clamped
    pub fn search_interval(&self, passive: bool) -> u64 {
        let st = self.state.lock();
        if passive {
            st.search_interval_passive_ms
        } else {
            st.search_interval_ms
        }
    }

    // =========================================================================
    // Transport callbacks
    // =========================================================================

    /// Socket connected: start a fresh login.
    pub fn on_connected(&self) {
        {
            let mut st = self.state.lock();
            st.state = State::Protocol;
            st.closed = false;
            st.logged_in_fired = false;
            st.supports = HubSupports::empty();
            st.salt = None;
            st.last_myinfo.clear();
            st.last_update = None;
            st.pending_update = None;
            st.last_mode = None;
            st.pending_nat = None;
            st.mirrored.clear();
        }
        info!("Connected to {}", self.hub_url);
        self.fire(HubEvent::Connected);
    }

    /// Dispatch one inbound line (without the trailing `|`).
    pub fn on_line(&self, raw: &[u8], now: u64) {
        if raw.is_empty() || self.is_closed() {
            return;
        }
        let text = String::from_utf8_lossy(raw);
        match parse_line(&text) {
            ParsedLine::Chat(chat) => handlers::chat(self, chat),
            ParsedLine::Command { name, param } => {
                let line = Line {
                    raw,
                    text: &text,
                    name,
                    param,
                    now,
                };
                match self.handlers.get(name) {
                    Some(handler) => handler(self, &line),
                    None => {
                        debug!("{}: unknown command {}", self.hub_url, name);
                        self.context
                            .diagnostics
                            .record_unknown(&self.hub_url, name, &text);
                    }
                }
            }
        }
    }

    /// Timer callback: flush deferred presence, expire NAT partner, sweep bans.
    pub fn on_tick(&self, now: u64) {
        let (flush, sweep) = {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            if let Some(pending) = &st.pending_nat {
                if now > pending.expires {
                    debug!("Pending NAT partner {} expired", pending.nick);
                    st.pending_nat = None;
                }
            }
            let flush = st.state == State::Normal
                && st.pending_update.map_or(false, |due| now >= due);
            let sweep = now.saturating_sub(st.last_sweep) >= SWEEP_INTERVAL_MS;
            if sweep {
                st.last_sweep = now;
            }
            (flush, sweep)
        };
        if flush {
            self.update_info(false, false, now);
        }
        if sweep {
            self.connect_guard.remove_expired(now);
            self.search_guard.remove_expired(now);
        }
    }

    /// Transport failed or closed.
    pub fn on_failed(&self, reason: &str) {
        self.teardown(DisconnectReason::Transport(reason.to_string()));
    }

    /// Close the session locally.
    pub fn disconnect(&self) {
        self.teardown(DisconnectReason::UserRequested);
    }

    /// Idempotent teardown: clears users, drops NAT state, notifies once.
    pub(crate) fn teardown(&self, reason: DisconnectReason) {
        {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            st.state = State::Disconnected;
            st.pending_nat = None;
            st.pending_update = None;
        }
        let dropped = self.directory.clear();
        self.context.clear_role(&self.hub_url);
        info!("{}: {} ({} users dropped)", self.hub_url, reason, dropped);
        self.fire(HubEvent::Disconnected(reason));
    }

    /// Prepare a new nick after the hub rejected ours.
    ///
    /// Returns `None` when retries are disabled or no valid nick exists.
    pub fn next_nick_after_rejection(&self) -> Option<String> {
        if !self.config.auto_nick_retry {
            return None;
        }
        let mut rng = rand::thread_rng();
        let mut st = self.state.lock();
        let base = nick_rule::sanitize_nick(&self.config.nick);
        let candidate = match &st.nick_rule {
            Some(rule) => {
                let (nick, suffixed) = rule.convert(&base, &mut rng)?;
                let nick = if suffixed {
                    nick
                } else {
                    nick_rule::with_random_suffix(&nick, 0, &mut rng)
                };
                if rule.max_len > 0 && nick.chars().count() > rule.max_len {
                    warn!("{}: no nick fits the hub's nick rule", self.hub_url);
                    return None;
                }
                nick
            }
            None => nick_rule::with_random_suffix(&base, 0, &mut rng),
        };
        st.retry_nick = Some(candidate.clone());
        Some(candidate)
    }

    // =========================================================================
    // Outgoing
    // =========================================================================

    /// Queue a command for the hub.
    pub(crate) fn send(&self, cmd: OutCommand) {
        debug!("{} <- {}", self.hub_url, cmd.type_name());
        if self.outbox.send(cmd.to_wire()).is_err() {
            warn!("{}: outbox closed, dropping {}", self.hub_url, cmd.type_name());
        }
    }

    pub(crate) fn fire(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn flood_notice(&self, verdict: Verdict, what: &str) {
        if verdict.show_msg {
            warn!("{}: flood detected: {}", self.hub_url, what);
            self.fire(HubEvent::FloodDetected(what.to_string()));
        }
    }

    /// `(my_nick)` when logged in
    pub(crate) fn normal_nick(&self) -> Option<String> {
        let st = self.state.lock();
        (st.state == State::Normal && !st.closed).then(|| st.my_nick.clone())
    }

    /// Public chat.
    pub fn hub_message(&self, text: &str, third_person: bool) {
        let Some(nick) = self.normal_nick() else {
            return;
        };
        let text = if third_person {
            format!("/me {}", text)
        } else {
            text.to_string()
        };
        self.send(OutCommand::Chat { nick, text });
    }

    /// Private message; the sent text is echoed as a `Message` event.
    pub fn private_message(&self, to: &str, text: &str, third_person: bool) {
        let Some(from) = self.normal_nick() else {
            return;
        };
        let body = if third_person {
            format!("/me {}", text)
        } else {
            text.to_string()
        };
        self.send(OutCommand::PrivateMessage {
            to: to.to_string(),
            from: from.clone(),
            text: body,
        });
        self.fire(HubEvent::Message(crate::hub::events::ChatMessage {
            from,
            text: text.to_string(),
            third_person,
            reply_to: Some(to.to_string()),
            from_hub: false,
        }));
    }

    /// Send `$MyPass`; `store` keeps the password for later `$GetPass`.
    pub fn password(&self, password: &str, store: bool) {
        let salt = {
            let mut st = self.state.lock();
            if store {
                st.password = password.to_string();
            }
            st.salt.clone()
        };
        self.send(OutCommand::MyPass(password_response(password, salt.as_deref())));
    }
}

/// Hex SHA-256 of `password‖salt`, or the plain password without a salt.
pub fn password_response(password: &str, salt: Option<&str>) -> String {
    use sha2::{Digest, Sha256};
    match salt {
        Some(salt) if !salt.is_empty() => {
            let mut hasher = Sha256::new();
            hasher.update(password.as_bytes());
            hasher.update(salt.as_bytes());
            hex::encode(hasher.finalize())
        }
        _ => password.to_string(),
    }
}
