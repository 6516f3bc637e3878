//! The framed TCP transport: request/ack correlation, capped reconnect,
//! and the background reader that feeds the reconciler.
//!
//! A [`SessionClient`] owns one connection at a time. Requests get a
//! fresh correlation handle and park on a oneshot until the matching ack
//! arrives; broadcasts are folded into the shared [`LocalView`] before
//! being surfaced through the event stream, so by the time a caller sees
//! an event the view already reflects it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tabletop_sim::{Response, RoleSlot, Scenario, SessionMode, normalize_code};
use tabletop_wire::{
    Ack, ChatMessageProto, ChatRequest, ClientEnvelope, ClientRequest, DecisionRequest,
    GetStateRequest, JoinPlayer, JoinRequest, PeekRequest, PingRequest, ServerEnvelope,
    ServerMessage, SnapshotProto, StartRequest, read_frame, write_frame,
};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::reconciler::LocalView;
use crate::{MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY, REQUEST_TIMEOUT};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Ack>>>>;

/// The session membership this client established. Kept so a dropped
/// connection can rejoin as the same player.
#[derive(Debug, Clone)]
struct Identity {
    code: String,
    player_id: String,
    name: String,
    role: String,
}

/// One client connection to a synchronization server.
pub struct SessionClient {
    addr: SocketAddr,
    out_tx: mpsc::UnboundedSender<ClientEnvelope>,
    pending: Pending,
    view: Arc<Mutex<LocalView>>,
    events_tx: mpsc::UnboundedSender<ServerMessage>,
    events_rx: mpsc::UnboundedReceiver<ServerMessage>,
    next_correlation: u64,
    identity: Option<Identity>,
}

impl SessionClient {
    /// Connect, retrying up to `MAX_RECONNECT_ATTEMPTS` times with a
    /// fixed delay between attempts.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let view = Arc::new(Mutex::new(LocalView::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let out_tx = open(addr, pending.clone(), view.clone(), events_tx.clone()).await?;
        Ok(Self {
            addr,
            out_tx,
            pending,
            view,
            events_tx,
            events_rx,
            next_correlation: 0,
            identity: None,
        })
    }

    // ------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------

    /// Create a session and join it as host. The ack snapshot seeds the
    /// local view; in single mode the session is already active.
    pub async fn create_session(
        &mut self,
        code: &str,
        player_id: &str,
        name: &str,
        role: &str,
        mode: SessionMode,
        scenario: &Scenario,
        role_slots: Vec<RoleSlot>,
    ) -> Result<(), ClientError> {
        self.join_inner(JoinRequest {
            code: code.into(),
            player: Some(JoinPlayer {
                id: player_id.into(),
                name: name.into(),
                role: role.into(),
            }),
            is_host: true,
            mode: mode.as_str().into(),
            scenario: Some(scenario.into()),
            role_slots: role_slots.iter().map(Into::into).collect(),
        })
        .await
    }

    /// Join an existing session.
    pub async fn join_session(
        &mut self,
        code: &str,
        player_id: &str,
        name: &str,
        role: &str,
    ) -> Result<(), ClientError> {
        self.join_inner(JoinRequest {
            code: code.into(),
            player: Some(JoinPlayer {
                id: player_id.into(),
                name: name.into(),
                role: role.into(),
            }),
            is_host: false,
            mode: String::new(),
            scenario: None,
            role_slots: Vec::new(),
        })
        .await
    }

    async fn join_inner(&mut self, req: JoinRequest) -> Result<(), ClientError> {
        let identity = Identity {
            code: normalize_code(&req.code),
            player_id: req.player.as_ref().map(|p| p.id.clone()).unwrap_or_default(),
            name: req.player.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            role: req.player.as_ref().map(|p| p.role.clone()).unwrap_or_default(),
        };
        let ack = self.request(ClientRequest::Join(req)).await?;
        if let Some(snapshot) = &ack.snapshot {
            self.view.lock().await.merge_snapshot(snapshot);
        }
        self.identity = Some(identity);
        Ok(())
    }

    /// Read-only look at a session without joining it.
    pub async fn peek(&mut self, code: &str) -> Result<SnapshotProto, ClientError> {
        let ack = self
            .request(ClientRequest::Peek(PeekRequest { code: code.into() }))
            .await?;
        ack.snapshot.ok_or(ClientError::Protocol("peek ack without snapshot"))
    }

    /// Host-only: move the session to active.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        let identity = self.identity()?;
        self.request(ClientRequest::Start(StartRequest {
            code: identity.code,
            player_id: identity.player_id,
        }))
        .await?;
        Ok(())
    }

    /// Submit a decision response. Applied to the local view first; the
    /// confirming broadcast is absorbed by the dedup key, and a typed
    /// rejection rolls the optimistic record back. A timeout does not
    /// roll back, because the server may have committed; reconcile with
    /// [`request_state`](Self::request_state) instead.
    pub async fn submit_decision(&mut self, response: Response) -> Result<(), ClientError> {
        let identity = self.identity()?;
        let decision_id = response.decision_id.clone();
        let timestamp_ms = response.timestamp_ms;
        self.view
            .lock()
            .await
            .apply_local_decision(&identity.player_id, response.clone());

        let result = self
            .request(ClientRequest::Decision(DecisionRequest {
                code: identity.code,
                player_id: identity.player_id.clone(),
                response: Some((&response).into()),
            }))
            .await;
        if let Err(ClientError::Rejected { .. }) = &result {
            self.view.lock().await.rollback_local_decision(
                &identity.player_id,
                &decision_id,
                timestamp_ms,
            );
        }
        result.map(|_| ())
    }

    /// Fetch the authoritative snapshot and fold it in.
    pub async fn request_state(&mut self) -> Result<(), ClientError> {
        let identity = self.identity()?;
        let ack = self
            .request(ClientRequest::GetState(GetStateRequest {
                code: identity.code,
                player_id: identity.player_id,
            }))
            .await?;
        let snapshot = ack
            .snapshot
            .ok_or(ClientError::Protocol("state ack without snapshot"))?;
        self.view.lock().await.merge_snapshot(&snapshot);
        Ok(())
    }

    /// Relay a chat line to the room.
    pub async fn send_chat(&mut self, text: &str) -> Result<(), ClientError> {
        let identity = self.identity()?;
        self.request(ClientRequest::Chat(ChatRequest {
            code: identity.code,
            message: Some(ChatMessageProto {
                player_id: identity.player_id,
                player_name: identity.name,
                text: text.into(),
                timestamp_ms: 0, // stamped server-side
            }),
        }))
        .await?;
        Ok(())
    }

    /// Keepalive round trip.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.request(ClientRequest::Ping(PingRequest::default()))
            .await?;
        Ok(())
    }

    /// Reopen the connection and rejoin as the same player. The join ack
    /// snapshot reconciles whatever was missed while disconnected; the
    /// local view is kept across the gap.
    pub async fn resume(&mut self) -> Result<(), ClientError> {
        let identity = self.identity()?;
        self.out_tx = open(
            self.addr,
            self.pending.clone(),
            self.view.clone(),
            self.events_tx.clone(),
        )
        .await?;
        self.join_inner(JoinRequest {
            code: identity.code,
            player: Some(JoinPlayer {
                id: identity.player_id,
                name: identity.name,
                role: identity.role,
            }),
            is_host: false,
            mode: String::new(),
            scenario: None,
            role_slots: Vec::new(),
        })
        .await
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Snapshot of the reconciled local view.
    pub async fn view(&self) -> LocalView {
        self.view.lock().await.clone()
    }

    /// Next broadcast from the server. The view has already absorbed the
    /// message by the time it is returned here. `None` means the
    /// connection (and any resumed successor) is gone.
    pub async fn next_event(&mut self) -> Option<ServerMessage> {
        self.events_rx.recv().await
    }

    pub fn session_code(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.code.as_str())
    }

    pub fn player_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.player_id.as_str())
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    fn identity(&self) -> Result<Identity, ClientError> {
        self.identity.clone().ok_or(ClientError::NotJoined)
    }

    /// Send one request and wait for its ack. A typed rejection becomes
    /// `Rejected`; a missing ack becomes `Timeout` or `ConnectionClosed`.
    async fn request(&mut self, request: ClientRequest) -> Result<Ack, ClientError> {
        self.next_correlation += 1;
        let correlation = self.next_correlation;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(correlation, tx);

        let envelope = ClientEnvelope {
            correlation,
            request: Some(request),
        };
        if self.out_tx.send(envelope).is_err() {
            self.pending.lock().await.remove(&correlation);
            return Err(ClientError::ConnectionClosed);
        }

        let ack = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&correlation);
                return Err(ClientError::Timeout);
            }
        };
        match ack.error {
            Some(err) => Err(ClientError::from_wire(err)),
            None => Ok(ack),
        }
    }
}

/// Dial with capped retries, then spawn the writer and reader tasks for
/// the fresh socket. Returns the handle the request path writes into.
async fn open(
    addr: SocketAddr,
    pending: Pending,
    view: Arc<Mutex<LocalView>>,
    events_tx: mpsc::UnboundedSender<ServerMessage>,
) -> Result<mpsc::UnboundedSender<ClientEnvelope>, ClientError> {
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(%addr, attempt, "connected");
                let (reader, mut writer) = stream.into_split();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEnvelope>();
                tokio::spawn(async move {
                    while let Some(envelope) = out_rx.recv().await {
                        if let Err(e) = write_frame(&mut writer, &envelope).await {
                            debug!(error = %e, "write failed, closing");
                            break;
                        }
                    }
                });
                tokio::spawn(reader_task(reader, pending, view, events_tx));
                return Ok(out_tx);
            }
            Err(e) => {
                warn!(%addr, attempt, error = %e, "connect attempt failed");
                if attempt < MAX_RECONNECT_ATTEMPTS {
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
    Err(ClientError::ConnectFailed {
        attempts: MAX_RECONNECT_ATTEMPTS,
    })
}

/// Drains incoming frames for one socket's lifetime. Acks are routed to
/// their parked request; broadcasts hit the view, then the event stream.
async fn reader_task(
    mut reader: OwnedReadHalf,
    pending: Pending,
    view: Arc<Mutex<LocalView>>,
    events_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        match read_frame::<_, ServerEnvelope>(&mut reader).await {
            Ok(Some(envelope)) => {
                let Some(message) = envelope.message else {
                    debug!("envelope with no message body");
                    continue;
                };
                if envelope.correlation != 0 {
                    match message {
                        ServerMessage::Ack(ack) => {
                            if let Some(tx) =
                                pending.lock().await.remove(&envelope.correlation)
                            {
                                let _ = tx.send(ack);
                            }
                        }
                        _ => warn!(
                            correlation = envelope.correlation,
                            "correlated reply that is not an ack"
                        ),
                    }
                    continue;
                }
                view.lock().await.apply(&message);
                let _ = events_tx.send(message);
            }
            Ok(None) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read failed, closing");
                break;
            }
        }
    }
    // Fail requests still in flight on this socket.
    pending.lock().await.clear();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tabletop_sim::{Decision, DecisionOption, SessionStatus};
    use tokio::net::TcpListener;

    async fn start_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = tabletop_server::serve(listener).await;
        });
        addr
    }

    fn scenario(steps: usize) -> Scenario {
        Scenario {
            id: "s1".into(),
            title: "Breach".into(),
            timeline: (0..steps)
                .map(|i| Decision {
                    id: format!("d{i}"),
                    prompt: format!("step {i}"),
                    time_limit_secs: 90,
                    options: vec![DecisionOption {
                        id: "a".into(),
                        text: "Escalate".into(),
                    }],
                    required_resources: vec![],
                })
                .collect(),
        }
    }

    fn role_slots() -> Vec<RoleSlot> {
        vec![
            RoleSlot {
                role: "CEO".into(),
                display_name: "Chief Executive".into(),
                player_id: None,
            },
            RoleSlot {
                role: "CFO".into(),
                display_name: "Chief Financial".into(),
                player_id: None,
            },
        ]
    }

    fn response(decision_id: &str, ts: u64) -> Response {
        Response {
            decision_id: decision_id.into(),
            option_id: "a".into(),
            confidence_level: 3,
            response_time_ms: 1200,
            available_resources: vec![],
            timestamp_ms: ts,
        }
    }

    /// Pump events until the view satisfies `pred`, with a hard cap so a
    /// broken broadcast path fails the test instead of hanging it.
    async fn wait_until<F>(client: &mut SessionClient, mut pred: F)
    where
        F: FnMut(&LocalView) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                if pred(&client.view().await) {
                    return;
                }
                client.next_event().await.expect("event stream ended");
            }
        })
        .await
        .expect("view never reached the expected state");
    }

    #[tokio::test]
    async fn test_single_player_flow() {
        let addr = start_server().await;
        let mut client = SessionClient::connect(addr).await.unwrap();
        client
            .create_session("solo", "p1", "Alice", "CEO", SessionMode::Single, &scenario(2), vec![])
            .await
            .unwrap();

        let view = client.view().await;
        assert_eq!(view.code.as_deref(), Some("SOLO"));
        assert_eq!(view.status, SessionStatus::Active);
        assert_eq!(client.player_id(), Some("p1"));

        client.submit_decision(response("d0", 100)).await.unwrap();
        wait_until(&mut client, |v| {
            v.player("p1").is_some_and(|p| p.current_step == 1)
        })
        .await;

        client.submit_decision(response("d1", 200)).await.unwrap();
        wait_until(&mut client, |v| v.status == SessionStatus::Completed).await;
        assert_eq!(client.view().await.player("p1").unwrap().responses.len(), 2);
    }

    #[tokio::test]
    async fn test_multiplayer_advances_only_when_all_answer() {
        let addr = start_server().await;
        let mut host = SessionClient::connect(addr).await.unwrap();
        host.create_session("duo", "ceo", "Alice", "CEO", SessionMode::Multi, &scenario(1), role_slots())
            .await
            .unwrap();
        assert_eq!(host.view().await.status, SessionStatus::Waiting);

        let mut guest = SessionClient::connect(addr).await.unwrap();
        guest.join_session("duo", "cfo", "Bob", "CFO").await.unwrap();
        wait_until(&mut host, |v| v.players.len() == 2).await;

        host.start().await.unwrap();
        wait_until(&mut guest, |v| v.status == SessionStatus::Active).await;

        // One answer in: the room sees it, but nobody moves.
        host.submit_decision(response("d0", 100)).await.unwrap();
        wait_until(&mut guest, |v| {
            v.player("ceo").is_some_and(|p| p.responses.len() == 1)
        })
        .await;
        assert_eq!(guest.view().await.player("ceo").unwrap().current_step, 0);

        // The last answer advances everyone and completes the timeline.
        guest.submit_decision(response("d0", 110)).await.unwrap();
        wait_until(&mut host, |v| v.status == SessionStatus::Completed).await;
        wait_until(&mut guest, |v| v.status == SessionStatus::Completed).await;
        assert!(host
            .view()
            .await
            .players
            .values()
            .all(|p| p.current_step == 1));
    }

    #[tokio::test]
    async fn test_taken_role_is_rejected() {
        let addr = start_server().await;
        let mut host = SessionClient::connect(addr).await.unwrap();
        host.create_session("room", "ceo", "Alice", "CEO", SessionMode::Multi, &scenario(1), role_slots())
            .await
            .unwrap();

        let mut late = SessionClient::connect(addr).await.unwrap();
        let err = late
            .join_session("room", "p2", "Mallory", "CEO")
            .await
            .unwrap_err();
        match err {
            ClientError::Rejected { kind, .. } => assert_eq!(kind, "role_unavailable"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_decision_rolls_back_optimistic_record() {
        let addr = start_server().await;
        let mut client = SessionClient::connect(addr).await.unwrap();
        client
            .create_session("solo", "p1", "Alice", "CEO", SessionMode::Single, &scenario(1), vec![])
            .await
            .unwrap();

        let err = client
            .submit_decision(response("wrong-step", 100))
            .await
            .unwrap_err();
        match err {
            ClientError::Rejected { kind, .. } => assert_eq!(kind, "invalid_input"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(client.view().await.player("p1").unwrap().responses.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_player_left() {
        let addr = start_server().await;
        let mut host = SessionClient::connect(addr).await.unwrap();
        host.create_session("room", "ceo", "Alice", "CEO", SessionMode::Multi, &scenario(1), role_slots())
            .await
            .unwrap();

        let mut guest = SessionClient::connect(addr).await.unwrap();
        guest.join_session("room", "cfo", "Bob", "CFO").await.unwrap();
        wait_until(&mut host, |v| v.players.len() == 2).await;

        drop(guest);
        wait_until(&mut host, |v| v.players.len() == 1).await;
        let view = host.view().await;
        assert!(view.player("cfo").is_none());
        let cfo_slot = view.role_slots.iter().find(|s| s.role == "CFO").unwrap();
        assert_eq!(cfo_slot.player_id, None);
    }

    #[tokio::test]
    async fn test_resume_rejoins_as_same_player() {
        let addr = start_server().await;
        let mut host = SessionClient::connect(addr).await.unwrap();
        host.create_session("room", "ceo", "Alice", "CEO", SessionMode::Multi, &scenario(1), role_slots())
            .await
            .unwrap();

        let mut guest = SessionClient::connect(addr).await.unwrap();
        guest.join_session("room", "cfo", "Bob", "CFO").await.unwrap();
        wait_until(&mut host, |v| v.players.len() == 2).await;
        host.start().await.unwrap();

        // Reopen the socket and rejoin with the same identity.
        guest.resume().await.unwrap();
        let view = guest.view().await;
        assert_eq!(view.players.len(), 2);
        assert_eq!(view.status, SessionStatus::Active);

        // The resumed connection can still act for its player.
        guest.submit_decision(response("d0", 100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let addr = start_server().await;
        let mut host = SessionClient::connect(addr).await.unwrap();
        host.create_session("room", "ceo", "Alice", "CEO", SessionMode::Multi, &scenario(1), role_slots())
            .await
            .unwrap();

        let mut guest = SessionClient::connect(addr).await.unwrap();
        guest.join_session("room", "cfo", "Bob", "CFO").await.unwrap();

        host.send_chat("status?").await.unwrap();
        let line = timeout(Duration::from_secs(5), async {
            loop {
                match guest.next_event().await.expect("event stream ended") {
                    ServerMessage::ChatMessage(chat) => return chat.message.unwrap(),
                    _ => continue,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(line.player_id, "ceo");
        assert_eq!(line.text, "status?");
        assert!(line.timestamp_ms > 0);
    }

    #[tokio::test]
    async fn test_ping_and_peek() {
        let addr = start_server().await;
        let mut client = SessionClient::connect(addr).await.unwrap();
        client.ping().await.unwrap();

        let mut host = SessionClient::connect(addr).await.unwrap();
        host.create_session("room", "ceo", "Alice", "CEO", SessionMode::Multi, &scenario(1), role_slots())
            .await
            .unwrap();

        // Peek needs no membership and accepts unnormalized codes.
        let snap = client.peek(" room ").await.unwrap();
        assert_eq!(snap.code, "ROOM");
        assert_eq!(snap.players.len(), 1);

        match client.peek("NONE").await.unwrap_err() {
            ClientError::Rejected { kind, .. } => assert_eq!(kind, "not_found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_capped_attempts() {
        // Bind then drop to find a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match SessionClient::connect(addr).await {
            Err(ClientError::ConnectFailed { attempts }) => {
                assert_eq!(attempts, MAX_RECONNECT_ATTEMPTS);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_operations_before_join_fail_cleanly() {
        let addr = start_server().await;
        let mut client = SessionClient::connect(addr).await.unwrap();
        assert!(matches!(client.start().await, Err(ClientError::NotJoined)));
        assert!(matches!(
            client.submit_decision(response("d0", 1)).await,
            Err(ClientError::NotJoined)
        ));
    }
}
