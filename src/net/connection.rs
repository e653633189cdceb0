//! TCP transport for one hub session
//!
//! Frames the socket with [`NmdcCodec`], feeds inbound lines to the session,
//! drains the session's outbox and drives its timer. Reconnects after a
//! delay while the session allows it.

use crate::hub::{ClientContext, ConnectionBroker, HubConfig, HubEvent, HubSession, SearchResponder};
use crate::protocol::codec::{CodecError, NmdcCodec};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

/// How long a TCP connect may take
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Session timer period
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Transport errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    CodecError(#[from] CodecError),
    #[error("Connection to {0} timed out")]
    Timeout(String),
    #[error("Connection closed by hub")]
    Closed,
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// A hub session plus the socket that carries it
pub struct HubClient {
    session: Arc<HubSession>,
    outbox: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl HubClient {
    /// Build the session; events arrive on the returned receiver.
    pub fn new(
        config: HubConfig,
        context: Arc<ClientContext>,
        broker: Arc<dyn ConnectionBroker>,
        responder: Arc<dyn SearchResponder>,
    ) -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (out_tx, outbox) = mpsc::unbounded_channel();
        let (ev_tx, events) = mpsc::unbounded_channel();
        let session = Arc::new(HubSession::new(
            config, context, broker, responder, out_tx, ev_tx,
        ));
        (Self { session, outbox }, events)
    }

    pub fn session(&self) -> Arc<HubSession> {
        self.session.clone()
    }

    /// Connect and keep reconnecting until shut down or told not to.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let delay = Duration::from_secs(self.session.config().reconnect_delay_secs.max(1));
        loop {
            let result = self.run_once(&mut shutdown).await;
            match &result {
                Ok(()) => self.session.disconnect(),
                Err(e) => {
                    log::warn!("{}: {}", self.session.hub_url(), e);
                    self.session.on_failed(&e.to_string());
                }
            }
            if *shutdown.borrow() || !self.session.auto_reconnect() {
                break;
            }
            log::info!(
                "Reconnecting to {} in {}s",
                self.session.hub_url(),
                delay.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        log::info!("{}: transport stopped", self.session.hub_url());
    }

    /// One connection attempt; returns when the socket or session ends.
    async fn run_once(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), ConnectionError> {
        let address = self.session.config().socket_address();
        log::info!("Connecting to hub: {}", address);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| ConnectionError::Timeout(address.clone()))??;
        stream.set_nodelay(true)?;

        let session = &self.session;
        let outbox = &mut self.outbox;
        // lines queued for a previous connection are stale
        while outbox.try_recv().is_ok() {}

        let framed = Framed::new(stream, NmdcCodec);
        let (mut writer, mut reader) = framed.split();
        session.on_connected();

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                inbound = reader.next() => match inbound {
                    Some(Ok(line)) => session.on_line(&line, now_ms()),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(ConnectionError::Closed),
                },
                Some(line) = outbox.recv() => {
                    writer.send(line).await?;
                }
                _ = ticker.tick() => session.on_tick(now_ms()),
                _ = shutdown.changed() => {
                    log::info!("Disconnecting from {}", address);
                    return Ok(());
                }
            }
            if session.is_closed() {
                // flush what the session queued before closing
                while let Ok(line) = outbox.try_recv() {
                    writer.send(line).await?;
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::{config, FakeBroker, FakeResponder};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_now_ms_is_recent() {
        // 2020-01-01
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn test_login_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut cfg = config("me");
        cfg.address = format!("127.0.0.1:{}", port);
        let context = Arc::new(ClientContext::new(60));
        let (client, mut events) = HubClient::new(
            cfg,
            context,
            Arc::new(FakeBroker::new(false)),
            Arc::new(FakeResponder::new(0, Vec::new())),
        );
        let session = client.session();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(stop_rx));

        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"$Lock ABCDEFGHIJKLMNOP Pk=x|").await.unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 512];
        while !received.ends_with(b"$ValidateNick me|") {
            let n = sock.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert!(received.starts_with(b"$Key "));

        sock.write_all(b"$Hello me|").await.unwrap();
        loop {
            match events.recv().await {
                Some(HubEvent::LoggedIn) => break,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        assert_eq!(session.state(), crate::hub::State::Normal);

        session.set_auto_reconnect(false);
        stop_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(session.is_closed());
    }
}
