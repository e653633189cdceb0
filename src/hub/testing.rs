//! In-memory collaborators for session tests

use crate::hub::config::HubConfig;
use crate::hub::context::ClientContext;
use crate::hub::events::HubEvent;
use crate::hub::services::{ConnectionBroker, PeerConnect, SearchHit, SearchResponder};
use crate::hub::session::HubSession;
use crate::protocol::search::SearchRequest;
use crate::users::Cid;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct FakeBroker {
    pub active: bool,
    pub tls: bool,
    pub nat_port: u16,
    pub connects: Mutex<Vec<PeerConnect>>,
    pub expected: Mutex<Vec<String>>,
}

impl FakeBroker {
    pub fn new(active: bool) -> Self {
        Self {
            active,
            tls: false,
            nat_port: 5000,
            connects: Mutex::new(Vec::new()),
            expected: Mutex::new(Vec::new()),
        }
    }
}

impl ConnectionBroker for FakeBroker {
    fn port(&self) -> u16 {
        if self.active {
            4000
        } else {
            0
        }
    }

    fn secure_port(&self) -> u16 {
        if self.active && self.tls {
            4001
        } else {
            0
        }
    }

    fn tls_ok(&self) -> bool {
        self.tls
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn local_ip(&self) -> String {
        "10.0.0.1".to_string()
    }

    fn expect(&self, nick: &str, _my_nick: &str, _hub_url: &str, _expires: u64) -> bool {
        self.expected.lock().push(nick.to_string());
        true
    }

    fn connect(&self, request: PeerConnect) {
        self.connects.lock().push(request);
    }

    fn nat_port(&self) -> u16 {
        self.nat_port
    }
}

pub struct FakeResponder {
    pub udp_port: u16,
    pub hits: Vec<SearchHit>,
    pub searches: Mutex<Vec<SearchRequest>>,
    pub udp: Mutex<Vec<(String, u16, String)>>,
    pub results: Mutex<Vec<String>>,
}

impl FakeResponder {
    pub fn new(udp_port: u16, hits: Vec<SearchHit>) -> Self {
        Self {
            udp_port,
            hits,
            searches: Mutex::new(Vec::new()),
            udp: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
        }
    }
}

impl SearchResponder for FakeResponder {
    fn search(&self, request: &SearchRequest) -> Vec<SearchHit> {
        self.searches.lock().push(request.clone());
        self.hits.clone()
    }

    fn udp_port(&self) -> u16 {
        self.udp_port
    }

    fn free_slots(&self) -> u16 {
        2
    }

    fn send_udp(&self, ip: &str, port: u16, data: Vec<u8>) {
        self.udp
            .lock()
            .push((ip.to_string(), port, String::from_utf8_lossy(&data).into_owned()));
    }

    fn on_search_result(&self, line: &str) {
        self.results.lock().push(line.to_string());
    }
}

/// A session wired to fakes and in-memory channels
pub struct Harness {
    pub session: HubSession,
    pub context: Arc<ClientContext>,
    pub broker: Arc<FakeBroker>,
    pub responder: Arc<FakeResponder>,
    outbox: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedReceiver<HubEvent>,
}

pub const LOCK: &str = "$Lock EXTENDEDPROTOCOLABCABCABCABCABCABC Pk=test";

pub fn config(nick: &str) -> HubConfig {
    HubConfig {
        address: "hub.example:411".to_string(),
        nick: nick.to_string(),
        client_version: "0.1".to_string(),
        ..HubConfig::default()
    }
}

impl Harness {
    pub fn new(config: HubConfig, broker: FakeBroker, responder: FakeResponder) -> Self {
        let context = Arc::new(ClientContext::with_cid(Cid::for_nick("me", "dchub://self"), 60));
        let broker = Arc::new(broker);
        let responder = Arc::new(responder);
        let (out_tx, outbox) = mpsc::unbounded_channel();
        let (ev_tx, events) = mpsc::unbounded_channel();
        let session = HubSession::new(
            config,
            context.clone(),
            broker.clone(),
            responder.clone(),
            out_tx,
            ev_tx,
        );
        Self {
            session,
            context,
            broker,
            responder,
            outbox,
            events,
        }
    }

    pub fn active(nick: &str) -> Self {
        Self::new(config(nick), FakeBroker::new(true), FakeResponder::new(4002, Vec::new()))
    }

    pub fn passive(nick: &str) -> Self {
        Self::new(config(nick), FakeBroker::new(false), FakeResponder::new(0, Vec::new()))
    }

    pub fn feed(&self, line: &str, now: u64) {
        self.session.on_line(line.as_bytes(), now);
    }

    /// Connect and complete the login handshake.
    pub fn login(&mut self, now: u64) {
        self.session.on_connected();
        self.feed(LOCK, now);
        let nick = self.session.my_nick();
        self.feed(&format!("$Hello {}", nick), now);
        self.sent();
        self.events();
    }

    /// Raw lines queued since the last call
    pub fn sent_raw(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(bytes) = self.outbox.try_recv() {
            out.push(bytes);
        }
        out
    }

    pub fn sent(&mut self) -> Vec<String> {
        self.sent_raw()
            .into_iter()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect()
    }

    /// Events fired since the last call
    pub fn events(&mut self) -> Vec<HubEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
