//! Peer registry and message router
//!
//! One dispatch task per connection consumes that connection's events in
//! order. Registry locks are held only for lookups and snapshots; every send
//! happens after the lock is released, so a slow peer never blocks routing
//! for anyone else.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use switchboard_core::CredentialRequestError;

use crate::connection::{ConnectionEvent, EventReceiver, HeartbeatConnection};
use crate::credentials::{CredentialRecord, CredentialStore};
use crate::messages::{Bye, ByeNotice, Method, Negotiation, PeerInfo, Push, Request};
use crate::registry::{Peer, PeerRegistry};
use crate::session::SessionLegs;

type Registry = PeerRegistry<HeartbeatConnection>;

/// Signaling state shared by every connection
pub struct Signaler {
    registry: Registry,
    credentials: Arc<CredentialStore>,
}

impl Signaler {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            registry: PeerRegistry::new(),
            credentials,
        }
    }

    /// Number of registered peers
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of stored relay credentials
    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    /// Public info of a registered peer
    pub fn peer(&self, id: &str) -> Option<PeerInfo> {
        self.registry.lookup(id).map(|p| p.info)
    }

    /// Spawn the dispatch task for a new connection
    pub fn attach(self: &Arc<Self>, conn: Arc<HeartbeatConnection>, events: EventReceiver) -> JoinHandle<()> {
        let signaler = Arc::clone(self);
        tokio::spawn(async move { signaler.run(conn, events).await })
    }

    /// Handle a connection's events until it closes
    pub async fn run(&self, conn: Arc<HeartbeatConnection>, mut events: EventReceiver) {
        info!("Connection opened: {}", conn.label());

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Message(data) => self.handle_message(&conn, &data).await,
                ConnectionEvent::Close { code, reason } => {
                    self.handle_close(&conn, code, &reason).await;
                    break;
                }
            }
        }
    }

    /// Dispatch one inbound frame
    pub async fn handle_message(&self, conn: &Arc<HeartbeatConnection>, data: &[u8]) {
        let request = match Request::from_slice(data) {
            Ok(r) => r,
            Err(e) => {
                warn!("Dropping unparseable message from {}: {}", conn.label(), e);
                return;
            }
        };

        match request.method {
            Method::New => self.register(conn, &request).await,
            Method::Offer | Method::Answer | Method::Candidate => {
                self.forward(conn, &request, data).await
            }
            Method::Bye => self.bye(conn, &request).await,
            Method::Keepalive => deliver(conn, String::from_utf8_lossy(data).into_owned()).await,
            Method::Leave => {}
            Method::Unknown => warn!(
                "Unknown request from {}: {}",
                conn.label(),
                String::from_utf8_lossy(data)
            ),
        }
    }

    /// Remove every peer bound to a closed connection and tell the others
    pub async fn handle_close(&self, conn: &Arc<HeartbeatConnection>, code: u16, reason: &str) {
        debug!("Close event from {} [{}] {}", conn.label(), code, reason);

        let ids = self.registry.ids_for_connection(conn);
        if ids.is_empty() {
            warn!("Close event for unregistered connection {}", conn.label());
            return;
        }

        let departed: Vec<String> = ids
            .into_iter()
            .filter(|id| self.registry.remove_if_bound(id, conn).is_some())
            .collect();
        if departed.is_empty() {
            return;
        }

        let remaining = self.registry.snapshot();
        for id in departed {
            info!("Peer {} disconnected", id);
            broadcast(&remaining, &Push::Leave(id)).await;
        }

        self.notify_peers_update().await;
    }

    /// Issue relay credentials for a `service=turn&username=<id>` query
    pub fn handle_credential_request(
        &self,
        query: &str,
    ) -> Result<CredentialRecord, CredentialRequestError> {
        let mut service = None;
        let mut username = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "service" if service.is_none() => service = Some(value.into_owned()),
                "username" if username.is_none() => username = Some(value.into_owned()),
                _ => {}
            }
        }

        match service.as_deref() {
            None => return Err(CredentialRequestError::MissingService),
            Some("turn") => {}
            Some(_) => return Err(CredentialRequestError::InvalidService),
        }
        let username = username
            .filter(|u| !u.is_empty())
            .ok_or(CredentialRequestError::MissingUsername)?;

        debug!("Relay credentials request for username={}", username);
        let ttl_secs = self.credentials.relay().credential_ttl_secs;
        Ok(self.credentials.issue(&username, ttl_secs))
    }

    async fn register(&self, conn: &Arc<HeartbeatConnection>, request: &Request) {
        let info: PeerInfo = match request.data() {
            Ok(info) => info,
            Err(e) => {
                warn!("Malformed registration from {}: {}", conn.label(), e);
                return;
            }
        };

        info!("Peer {} ({}) registered from {}", info.id, info.name, conn.label());
        if let Some(previous) = self.registry.insert(Peer::new(info, conn.clone())) {
            if !Arc::ptr_eq(&previous.connection, conn) {
                info!(
                    "Peer {} re-registered, replacing connection {}",
                    previous.info.id,
                    previous.connection.label()
                );
            }
        }

        self.notify_peers_update().await;
    }

    async fn forward(&self, conn: &Arc<HeartbeatConnection>, request: &Request, raw: &[u8]) {
        let negotiation: Negotiation = match request.data() {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    "Malformed {} from {}: {}",
                    request.method.as_str(),
                    conn.label(),
                    e
                );
                return;
            }
        };

        match self.registry.lookup(&negotiation.to) {
            Some(target) => {
                debug!(
                    "Forwarding {} from {} to {}",
                    request.method.as_str(),
                    negotiation.from,
                    negotiation.to
                );
                deliver(&target.connection, String::from_utf8_lossy(raw).into_owned()).await;
            }
            None => {
                warn!(
                    "{} target {} not registered",
                    request.method.as_str(),
                    negotiation.to
                );
                let reason = format!("Peer [{}] not found", negotiation.to);
                push(conn, &Push::error(request.method, reason)).await;
            }
        }
    }

    async fn bye(&self, conn: &Arc<HeartbeatConnection>, request: &Request) {
        let bye: Bye = match request.data() {
            Ok(b) => b,
            Err(e) => {
                warn!("Malformed bye from {}: {}", conn.label(), e);
                return;
            }
        };

        let Some(legs) = SessionLegs::parse(&bye.session_id) else {
            let reason = format!("Invalid session [{}]", bye.session_id);
            push(conn, &Push::error(Method::Bye, reason)).await;
            return;
        };

        for leg in legs.iter() {
            match self.registry.lookup(leg) {
                Some(peer) => {
                    let notice = Push::Bye(ByeNotice {
                        to: leg.to_string(),
                        session_id: bye.session_id.clone(),
                    });
                    push(&peer.connection, &notice).await;
                }
                None => {
                    let reason = format!("Peer [{}] not found", leg);
                    push(conn, &Push::error(Method::Bye, reason)).await;
                }
            }
        }
    }

    /// Send the full peer list to every registered peer
    async fn notify_peers_update(&self) {
        let peers = self.registry.snapshot();
        let mut infos: Vec<PeerInfo> = peers.iter().map(|p| p.info.clone()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));

        broadcast(&peers, &Push::Peers(infos)).await;
    }
}

async fn deliver(conn: &HeartbeatConnection, text: String) {
    if let Err(e) = conn.send(text).await {
        debug!("Send to {} failed: {}", conn.label(), e);
    }
}

async fn push(conn: &HeartbeatConnection, message: &Push) {
    match message.to_json() {
        Ok(json) => deliver(conn, json).await,
        Err(e) => error!("Failed to serialize push: {}", e),
    }
}

async fn broadcast(peers: &[Peer<HeartbeatConnection>], message: &Push) {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize broadcast: {}", e);
            return;
        }
    };

    join_all(peers.iter().map(|p| deliver(&p.connection, json.clone()))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    use switchboard_core::RelayConfig;

    use crate::connection::testing::{quiet_config, ws_pair};
    use crate::connection::HeartbeatConfig;

    type Client = WebSocketStream<DuplexStream>;

    fn make_signaler() -> Arc<Signaler> {
        Arc::new(Signaler::new(Arc::new(CredentialStore::new(
            RelayConfig::default(),
        ))))
    }

    async fn connect(signaler: &Arc<Signaler>, label: &str) -> (Arc<HeartbeatConnection>, Client) {
        connect_with(signaler, label, quiet_config()).await
    }

    async fn connect_with(
        signaler: &Arc<Signaler>,
        label: &str,
        config: HeartbeatConfig,
    ) -> (Arc<HeartbeatConnection>, Client) {
        let (server, client) = ws_pair().await;
        let (conn, events) = HeartbeatConnection::spawn(server, label, config);
        signaler.attach(conn.clone(), events);
        (conn, client)
    }

    async fn send_text(client: &mut Client, text: &str) {
        client.send(Message::Text(text.into())).await.unwrap();
    }

    async fn recv_text(client: &mut Client) -> String {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame");
            match next {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    }

    async fn recv_json(client: &mut Client) -> Value {
        serde_json::from_str(&recv_text(client).await).unwrap()
    }

    async fn register(client: &mut Client, id: &str) {
        let msg = json!({"type":"new","data":{"id":id,"name":id.to_uppercase(),"user_agent":"test/1.0"}});
        send_text(client, &msg.to_string()).await;
    }

    fn peer_ids(push: &Value) -> Vec<String> {
        assert_eq!(push["type"], "peers", "expected a peer list, got {}", push);
        push["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect()
    }

    /// Round-trips a keepalive, proving nothing else was queued before it
    async fn assert_quiet(client: &mut Client) {
        send_text(client, r#"{"type":"keepalive"}"#).await;
        assert_eq!(recv_text(client).await, r#"{"type":"keepalive"}"#);
    }

    async fn wait_for_peer_count(signaler: &Signaler, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while signaler.peer_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry never reached the expected size");
    }

    #[tokio::test]
    async fn test_register_offer_and_disconnect() {
        let signaler = make_signaler();
        let (_alice_conn, mut alice) = connect(&signaler, "alice").await;
        let (_bob_conn, mut bob) = connect(&signaler, "bob").await;

        register(&mut alice, "alice").await;
        assert_eq!(peer_ids(&recv_json(&mut alice).await), vec!["alice"]);

        register(&mut bob, "bob").await;
        assert_eq!(peer_ids(&recv_json(&mut alice).await), vec!["alice", "bob"]);
        let bob_view = recv_json(&mut bob).await;
        assert_eq!(peer_ids(&bob_view), vec!["alice", "bob"]);
        assert_eq!(bob_view["data"][1]["name"], "BOB");
        assert_eq!(bob_view["data"][1]["user_agent"], "test/1.0");

        let offer = r#"{"type":"offer","data":{"from":"bob","to":"alice","session_id":"bob~alice","description":{"sdp":"v=0","type":"offer"}}}"#;
        send_text(&mut bob, offer).await;
        assert_eq!(recv_text(&mut alice).await, offer);

        alice.close(None).await.unwrap();
        assert_eq!(
            recv_json(&mut bob).await,
            json!({"type":"leave","data":"alice"})
        );
        assert_eq!(peer_ids(&recv_json(&mut bob).await), vec!["bob"]);
        assert_eq!(signaler.peer_count(), 1);
        assert!(signaler.peer("alice").is_none());
    }

    #[tokio::test]
    async fn test_answer_and_candidate_are_forwarded() {
        let signaler = make_signaler();
        let (_a, mut alice) = connect(&signaler, "alice").await;
        let (_b, mut bob) = connect(&signaler, "bob").await;
        register(&mut alice, "alice").await;
        recv_json(&mut alice).await;
        register(&mut bob, "bob").await;
        recv_json(&mut alice).await;
        recv_json(&mut bob).await;

        let answer = r#"{"type":"answer","data":{"from":"alice","to":"bob","session_id":"bob~alice","description":{"sdp":"v=0"}}}"#;
        let candidate = r#"{"type":"candidate","data":{"from":"alice","to":"bob","session_id":"bob~alice","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 9 typ host","sdpMid":"0"}}}"#;
        send_text(&mut alice, answer).await;
        send_text(&mut alice, candidate).await;

        assert_eq!(recv_text(&mut bob).await, answer);
        assert_eq!(recv_text(&mut bob).await, candidate);
        assert_quiet(&mut alice).await;
    }

    #[tokio::test]
    async fn test_offer_to_unknown_peer_yields_one_error() {
        let signaler = make_signaler();
        let (_b, mut bob) = connect(&signaler, "bob").await;
        register(&mut bob, "bob").await;
        recv_json(&mut bob).await;

        send_text(
            &mut bob,
            r#"{"type":"offer","data":{"from":"bob","to":"carol","session_id":"bob~carol"}}"#,
        )
        .await;

        let error = recv_json(&mut bob).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["data"]["request"], "offer");
        assert!(error["data"]["reason"].as_str().unwrap().contains("carol"));
        assert_quiet(&mut bob).await;
    }

    #[tokio::test]
    async fn test_bye_reaches_both_legs() {
        let signaler = make_signaler();
        let (_a, mut alice) = connect(&signaler, "alice").await;
        let (_b, mut bob) = connect(&signaler, "bob").await;
        register(&mut alice, "alice").await;
        recv_json(&mut alice).await;
        register(&mut bob, "bob").await;
        recv_json(&mut alice).await;
        recv_json(&mut bob).await;

        send_text(
            &mut bob,
            r#"{"type":"bye","data":{"session_id":"alice~bob","from":"bob"}}"#,
        )
        .await;

        assert_eq!(
            recv_json(&mut alice).await,
            json!({"type":"bye","data":{"to":"alice","session_id":"alice~bob"}})
        );
        assert_eq!(
            recv_json(&mut bob).await,
            json!({"type":"bye","data":{"to":"bob","session_id":"alice~bob"}})
        );
        assert_quiet(&mut alice).await;
        assert_quiet(&mut bob).await;
    }

    #[tokio::test]
    async fn test_bye_with_invalid_session_routes_nothing() {
        let signaler = make_signaler();
        let (_a, mut alice) = connect(&signaler, "alice").await;
        let (_b, mut bob) = connect(&signaler, "bob").await;
        register(&mut alice, "alice").await;
        recv_json(&mut alice).await;
        register(&mut bob, "bob").await;
        recv_json(&mut alice).await;
        recv_json(&mut bob).await;

        for session in ["alicebob", "alice~bob~carol"] {
            let msg = json!({"type":"bye","data":{"session_id":session,"from":"bob"}});
            send_text(&mut bob, &msg.to_string()).await;

            let error = recv_json(&mut bob).await;
            assert_eq!(error["data"]["request"], "bye");
            assert_eq!(
                error["data"]["reason"],
                format!("Invalid session [{}]", session)
            );
        }
        assert_quiet(&mut alice).await;
        assert_quiet(&mut bob).await;
    }

    #[tokio::test]
    async fn test_bye_reports_missing_leg() {
        let signaler = make_signaler();
        let (_a, mut alice) = connect(&signaler, "alice").await;
        register(&mut alice, "alice").await;
        recv_json(&mut alice).await;

        send_text(
            &mut alice,
            r#"{"type":"bye","data":{"session_id":"alice~ghost","from":"alice"}}"#,
        )
        .await;

        assert_eq!(recv_json(&mut alice).await["type"], "bye");
        let error = recv_json(&mut alice).await;
        assert_eq!(error["type"], "error");
        assert!(error["data"]["reason"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_dropped() {
        let signaler = make_signaler();
        let (conn, mut alice) = connect(&signaler, "alice").await;

        send_text(&mut alice, "not json").await;
        send_text(&mut alice, r#"{"type":"new","data":{"id":"alice"}}"#).await;
        send_text(&mut alice, r#"{"type":"subscribe","data":{}}"#).await;
        send_text(&mut alice, r#"{"type":"leave","data":"alice"}"#).await;

        assert_quiet(&mut alice).await;
        assert!(!conn.is_closed());
        assert_eq!(signaler.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_is_echoed_verbatim() {
        let signaler = make_signaler();
        let (_a, mut alice) = connect(&signaler, "alice").await;

        let keepalive = r#"{"type":"keepalive","data":{"ts":42}}"#;
        send_text(&mut alice, keepalive).await;
        assert_eq!(recv_text(&mut alice).await, keepalive);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_no_ghosts() {
        let signaler = make_signaler();
        let (_a, mut alice) = connect(&signaler, "alice").await;
        let (_b, mut bob) = connect(&signaler, "bob").await;
        register(&mut alice, "alice").await;
        register(&mut bob, "bob").await;
        wait_for_peer_count(&signaler, 2).await;

        drop(alice);
        drop(bob);
        wait_for_peer_count(&signaler, 0).await;
    }

    #[tokio::test]
    async fn test_stale_connection_close_keeps_new_registration() {
        let signaler = make_signaler();
        let (_old_conn, mut old) = connect(&signaler, "alice-old").await;
        let (new_conn, mut new) = connect(&signaler, "alice-new").await;

        register(&mut old, "alice").await;
        recv_json(&mut old).await;
        register(&mut new, "alice").await;
        recv_json(&mut new).await;

        old.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(signaler.peer_count(), 1);
        let peer = signaler.registry.lookup("alice").unwrap();
        assert!(Arc::ptr_eq(&peer.connection, &new_conn));
        assert_quiet(&mut new).await;
    }

    #[tokio::test]
    async fn test_credential_request_validation() {
        let signaler = make_signaler();

        assert_eq!(
            signaler.handle_credential_request("username=alice"),
            Err(CredentialRequestError::MissingService)
        );
        assert_eq!(
            signaler.handle_credential_request("service=stun&username=alice"),
            Err(CredentialRequestError::InvalidService)
        );
        assert_eq!(
            signaler.handle_credential_request("service=turn"),
            Err(CredentialRequestError::MissingUsername)
        );
        assert_eq!(
            signaler.handle_credential_request("service=turn&username="),
            Err(CredentialRequestError::MissingUsername)
        );
    }

    #[tokio::test]
    async fn test_credential_request_issues_and_stores() {
        let signaler = make_signaler();

        let record = signaler
            .handle_credential_request("service=turn&username=alice%40example")
            .unwrap();
        assert!(record.token.ends_with(":alice@example"));
        assert_eq!(record.ttl_secs, 86_400);
        assert_eq!(record.relay_uris.len(), 2);
        assert_eq!(signaler.credential_count(), 1);
        assert_eq!(
            signaler.credentials.lookup(&record.token).map(|r| r.secret),
            Some(record.secret)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_peer_is_removed_once() {
        let signaler = make_signaler();

        // "silent" never reads, so its pings are never answered
        let fast = HeartbeatConfig {
            ping_period: Duration::from_secs(1),
            pong_wait: Duration::from_secs(3),
            write_timeout: Duration::from_secs(1),
        };
        let (silent_conn, mut silent) = connect_with(&signaler, "silent", fast).await;
        register(&mut silent, "silent").await;
        wait_for_peer_count(&signaler, 1).await;

        let (_bob_conn, mut bob) = connect(&signaler, "bob").await;
        register(&mut bob, "bob").await;
        assert_eq!(peer_ids(&recv_json(&mut bob).await), vec!["bob", "silent"]);

        let leave = recv_json(&mut bob).await;
        assert_eq!(leave, json!({"type":"leave","data":"silent"}));
        assert_eq!(peer_ids(&recv_json(&mut bob).await), vec!["bob"]);

        assert!(silent_conn.is_closed());
        assert!(signaler.peer("silent").is_none());
        assert_eq!(signaler.peer_count(), 1);

        // Long after the deadline: no second leave or peer list
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_quiet(&mut bob).await;
        assert_eq!(signaler.peer_count(), 1);
    }
}
