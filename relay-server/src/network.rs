//! Network handling for the relay server
//!
//! One task per TCP connection reads request frames and answers them against
//! the shared [`PartyHub`]. A writer task owns the socket's write half; room
//! events reach it through the same outbound queue as replies.

use crate::auth::DevIdentityProvider;
use crate::frame::{read_frame, write_frame, FrameError};
use crate::history::JsonLinesSink;
use crate::metrics::{LogLevel, Metrics, ServerStatus};
use crate::protocol::{ClientFrame, ErrorBody, Request, ServerMessage};
use party_core::room::{RoomId, RoomManager};
use party_core::sync::ReportOutcome;
use party_core::{Identity, IdentityProvider, PartyHub, Subscription, SyncConfig};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default TCP port
const DEFAULT_TCP_PORT: u16 = 4100;

/// Replies and events waiting for the writer task, per connection
const OUTBOUND_QUEUE: usize = 256;

/// How often the room count on the dashboard is refreshed
const ROOM_COUNT_INTERVAL: Duration = Duration::from_secs(1);

/// Events sent from network to dashboard
#[derive(Debug)]
pub enum NetworkEvent {
    Ready { addr: SocketAddr },
}

/// Relay settings, read from the environment
pub struct RelayConfig {
    pub bind_addr: IpAddr,
    pub tcp_port: u16,
    /// Append history records here as JSON lines
    pub history_file: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(addr) => addr.parse()?,
            Err(_) => IpAddr::from([0, 0, 0, 0]),
        };
        let tcp_port = std::env::var("TCP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_TCP_PORT);
        let history_file = std::env::var_os("PARTY_HISTORY_FILE").map(PathBuf::from);

        let sync = SyncConfig::from_env();
        sync.validate()?;

        Ok(Self {
            bind_addr,
            tcp_port,
            history_file,
            sync,
        })
    }
}

fn build_hub(config: &RelayConfig) -> Result<PartyHub, Box<dyn Error>> {
    let hub = match &config.history_file {
        Some(path) => {
            let sink = JsonLinesSink::open(path)?;
            info!("Writing history to {}", path.display());
            PartyHub::with_history(config.sync.clone(), sink)?
        }
        None => PartyHub::new(config.sync.clone())?,
    };
    Ok(hub)
}

/// Run the network with dashboard integration
pub async fn run_with_dashboard(
    metrics: Arc<RwLock<Metrics>>,
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
) -> Result<(), Box<dyn Error>> {
    info!("Watch party relay starting...");
    let config = RelayConfig::from_env()?;
    let hub = build_hub(&config)?;

    let listener = TcpListener::bind((config.bind_addr, config.tcp_port)).await?;
    let addr = listener.local_addr()?;
    info!("Listening on {}", addr);

    {
        let mut m = metrics.write();
        m.bind_addr = Some(addr);
        m.status = ServerStatus::Running;
        m.log(LogLevel::Info, format!("Listening on {}", addr));
        if let Some(path) = &config.history_file {
            m.log(LogLevel::Info, format!("History file: {}", path.display()));
        }
    }
    let _ = event_tx.send(NetworkEvent::Ready { addr });

    serve(listener, hub, Arc::new(DevIdentityProvider), metrics).await;
    Ok(())
}

/// Run with plain logging (no dashboard)
pub async fn run_with_logging(metrics: Arc<RwLock<Metrics>>) -> Result<(), Box<dyn Error>> {
    // Initialize tracing for logging mode
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("party_relay=info".parse()?)
                .add_directive("party_core=info".parse()?),
        )
        .init();

    let (tx, _rx) = mpsc::unbounded_channel();
    run_with_dashboard(metrics, tx).await
}

/// Accept connections until the task is dropped
pub async fn serve(
    listener: TcpListener,
    hub: PartyHub,
    provider: Arc<dyn IdentityProvider>,
    metrics: Arc<RwLock<Metrics>>,
) {
    let mut room_count = tokio::time::interval(ROOM_COUNT_INTERVAL);

    loop {
        tokio::select! {
            _ = room_count.tick() => {
                metrics.write().live_rooms = hub.room_count();
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let _ = stream.set_nodelay(true);
                        info!(%addr, "Client connected");
                        metrics.write().connection_opened(addr);
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            hub.clone(),
                            Arc::clone(&provider),
                            Arc::clone(&metrics),
                        ));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        metrics.write().log(LogLevel::Warning, format!("Accept failed: {}", e));
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: PartyHub,
    provider: Arc<dyn IdentityProvider>,
    metrics: Arc<RwLock<Metrics>>,
) {
    let (mut reader, writer) = stream.into_split();
    let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(write_loop(writer, rx, Arc::clone(&metrics), addr));

    let mut conn = Connection {
        hub,
        provider,
        metrics: Arc::clone(&metrics),
        addr,
        identity: None,
        joined: None,
        outbound,
    };

    loop {
        match read_frame::<_, ClientFrame>(&mut reader).await {
            Ok(Some((frame, bytes))) => {
                metrics.write().frame_received(bytes);
                if conn.handle(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(FrameError::Json(e)) => {
                // Framing is still intact, so the connection survives
                debug!(%addr, "Unreadable request: {}", e);
                let reply = ServerMessage::reply(0, Err(ErrorBody::new("bad_request", e.to_string())));
                if conn.send(reply).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(%addr, "Closing connection: {}", e);
                metrics.write().log(LogLevel::Error, format!("{}: {}", addr, e));
                break;
            }
        }
    }

    conn.leave_current();
    drop(conn);
    let _ = writer_task.await;

    info!(%addr, "Client disconnected");
    metrics.write().connection_closed(addr);
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<ServerMessage>,
    metrics: Arc<RwLock<Metrics>>,
    addr: SocketAddr,
) {
    while let Some(message) = rx.recv().await {
        match write_frame(&mut writer, &message).await {
            Ok(bytes) => metrics.write().frame_sent(bytes),
            Err(e) => {
                debug!(%addr, "Write failed: {}", e);
                break;
            }
        }
    }
}

/// The writer task is gone; nothing more can be sent
struct ConnectionClosed;

struct JoinedRoom {
    room_id: RoomId,
    forwarder: JoinHandle<()>,
}

struct Connection {
    hub: PartyHub,
    provider: Arc<dyn IdentityProvider>,
    metrics: Arc<RwLock<Metrics>>,
    addr: SocketAddr,
    identity: Option<Identity>,
    /// The one room whose events this connection receives
    joined: Option<JoinedRoom>,
    outbound: mpsc::Sender<ServerMessage>,
}

impl Connection {
    async fn send(&self, message: ServerMessage) -> Result<(), ConnectionClosed> {
        self.outbound.send(message).await.map_err(|_| ConnectionClosed)
    }

    async fn handle(&mut self, frame: ClientFrame) -> Result<(), ConnectionClosed> {
        let ClientFrame { request_id, request } = frame;
        debug!(addr = %self.addr, request_id, op = request.op(), "Request");

        if let Request::Hello { token } = &request {
            return self.hello(request_id, token).await;
        }
        let reply = match self.identity.clone() {
            Some(identity) => self.dispatch(&identity, request),
            None => Err(ErrorBody::unauthenticated()),
        };
        if let Err(e) = &reply {
            debug!(addr = %self.addr, request_id, code = %e.code, "Request failed: {}", e.message);
        }
        self.send(ServerMessage::reply(request_id, reply)).await
    }

    async fn hello(&mut self, request_id: u64, token: &str) -> Result<(), ConnectionClosed> {
        if self.identity.is_some() {
            let error = ErrorBody::new("invalid_state", "this connection already said hello");
            return self.send(ServerMessage::reply(request_id, Err(error))).await;
        }
        let Some(identity) = self.provider.authenticate(token) else {
            warn!(addr = %self.addr, "Rejected hello with invalid token");
            self.metrics
                .write()
                .log(LogLevel::Warning, format!("Rejected: {} (bad token)", self.addr));
            let error = ErrorBody::new("unauthenticated", "token not accepted");
            return self.send(ServerMessage::reply(request_id, Err(error))).await;
        };

        info!(addr = %self.addr, user = %identity.user_id, "Client identified");
        self.metrics.write().client_identified(self.addr, &identity.user_id);
        self.identity = Some(identity.clone());
        self.send(ServerMessage::Welcome { identity }).await
    }

    fn dispatch(&mut self, identity: &Identity, request: Request) -> Result<Value, ErrorBody> {
        let rooms = self.hub.rooms();
        let user = identity.user_id.as_str();

        match request {
            Request::Hello { .. } => Err(ErrorBody::new("bad_request", "unexpected hello")),
            Request::CreateRoom { config } => reply(rooms.create_room(identity, config)?),
            Request::StartRoom { room_id } => {
                let (snapshot, _) = self.enter(identity, parse_room(&room_id)?, None, |rooms, id| {
                    rooms.start_room(id, identity)
                })?;
                reply(snapshot)
            }
            Request::JoinRoom { room_id, since } => {
                let (participant, gap) = self.enter(identity, parse_room(&room_id)?, since, |rooms, id| {
                    rooms.join_room(id, identity)
                })?;
                Ok(json!({ "participant": participant, "gap": gap }))
            }
            Request::LeaveRoom { room_id } => {
                let room_id = parse_room(&room_id)?;
                if self.joined.as_ref().is_some_and(|j| j.room_id == room_id) {
                    self.leave_current();
                } else {
                    rooms.leave_room(&room_id, user)?;
                }
                Ok(Value::Null)
            }
            Request::EndRoom { room_id } => {
                rooms.end_room(&parse_room(&room_id)?, identity)?;
                Ok(Value::Null)
            }
            Request::CancelRoom { room_id } => {
                rooms.cancel_room(&parse_room(&room_id)?, identity)?;
                Ok(Value::Null)
            }
            Request::TransferHost { room_id, target_id } => {
                let generation = rooms.transfer_host(&parse_room(&room_id)?, user, &target_id)?;
                Ok(json!({ "generation": generation }))
            }
            Request::SetCoHost {
                room_id,
                target_id,
                enabled,
            } => {
                rooms.set_co_host(&parse_room(&room_id)?, user, &target_id, enabled)?;
                Ok(Value::Null)
            }
            Request::ListRooms { filter } => reply(rooms.list_rooms(&filter)),
            Request::Snapshot { room_id } => reply(rooms.snapshot(&parse_room(&room_id)?)?),
            Request::ReportPlayback { room_id, mut report } => {
                // Reports always speak for the authenticated user
                report.participant_id = user.to_string();
                let outcome = self
                    .hub
                    .playback()
                    .report_host_state(&parse_room(&room_id)?, report)?;
                Ok(match outcome {
                    ReportOutcome::Accepted { change } => json!({ "accepted": true, "change": change }),
                    ReportOutcome::Dropped(reason) => json!({ "accepted": false, "dropped": reason }),
                })
            }
            Request::GetPlayback { room_id } => {
                reply(self.hub.playback().get_authoritative_state(&parse_room(&room_id)?)?)
            }
            Request::SendMessage {
                room_id,
                content,
                reply_to,
                client_nonce,
            } => reply(rooms.send_message(&parse_room(&room_id)?, user, content, reply_to, client_nonce)?),
            Request::SendReaction { room_id, emoji } => {
                reply(rooms.send_reaction(&parse_room(&room_id)?, user, emoji)?)
            }
            Request::React {
                room_id,
                message_id,
                emoji,
                delta,
            } => {
                let count = rooms.react(&parse_room(&room_id)?, user, message_id, &emoji, delta)?;
                Ok(json!({ "count": count }))
            }
            Request::CreatePoll {
                room_id,
                question,
                options,
            } => reply(rooms.create_poll(&parse_room(&room_id)?, user, question, options)?),
            Request::VotePoll {
                room_id,
                message_id,
                option,
            } => reply(rooms.vote_poll(&parse_room(&room_id)?, user, message_id, option)?),
            Request::PinMessage {
                room_id,
                message_id,
                pinned,
            } => {
                rooms.pin_message(&parse_room(&room_id)?, user, message_id, pinned)?;
                Ok(Value::Null)
            }
            Request::ReportMessage {
                room_id,
                message_id,
                reason,
            } => {
                rooms.report_message(&parse_room(&room_id)?, user, message_id, reason)?;
                Ok(Value::Null)
            }
        }
    }

    /// Make `room_id` this connection's room once `admit` has let the user in,
    /// and forward its events from `since`.
    ///
    /// A previously joined room is only left after the new one accepted the
    /// user, so a refused switch keeps the old membership intact. Returns
    /// `admit`'s value and whether the replay had a gap.
    fn enter<T>(
        &mut self,
        identity: &Identity,
        room_id: RoomId,
        since: Option<u64>,
        admit: impl FnOnce(&RoomManager, &RoomId) -> party_core::Result<T>,
    ) -> Result<(T, bool), ErrorBody> {
        let rooms = self.hub.rooms();
        let switching = self.joined.as_ref().is_some_and(|j| j.room_id != room_id);
        let admitted = admit(&rooms, &room_id)?;

        if !switching {
            // Our sink is about to be replaced, which is not a drop
            if let Some(joined) = &self.joined {
                joined.forwarder.abort();
            }
        }
        let subscription = match rooms.subscribe(&room_id, &identity.user_id, since) {
            Ok(subscription) => subscription,
            Err(e) => {
                if switching {
                    let _ = rooms.leave_room(&room_id, &identity.user_id);
                }
                return Err(e.into());
            }
        };
        if switching {
            self.leave_current();
        }

        let gap = subscription.gap;
        self.attach(subscription, since);
        self.metrics.write().client_joined(self.addr, &room_id.to_string());
        Ok((admitted, gap))
    }

    fn attach(&mut self, mut subscription: Subscription, since: Option<u64>) {
        let outbound = self.outbound.clone();
        let metrics = Arc::clone(&self.metrics);
        let addr = self.addr;
        let room_id = subscription.room_id.clone();
        let forwarder = tokio::spawn(async move {
            let mut last_seq = since;
            while let Some(envelope) = subscription.recv().await {
                last_seq = Some(envelope.seq);
                if outbound.send(ServerMessage::Event(envelope)).await.is_err() {
                    return;
                }
                metrics.write().event_relayed();
            }
            // Dropped as a slow reader, or the room closed
            debug!(%addr, room = %subscription.room_id, ?last_seq, "Event feed ended");
            let notice = ServerMessage::Unsubscribed {
                room_id: subscription.room_id.clone(),
                last_seq,
            };
            let _ = outbound.send(notice).await;
        });

        if let Some(previous) = self.joined.replace(JoinedRoom { room_id, forwarder }) {
            previous.forwarder.abort();
        }
    }

    /// Stop forwarding and leave the joined room, if any
    fn leave_current(&mut self) {
        let Some(joined) = self.joined.take() else {
            return;
        };
        joined.forwarder.abort();
        self.metrics.write().client_left_room(self.addr);

        let Some(identity) = &self.identity else {
            return;
        };
        let rooms = self.hub.rooms();
        rooms.unsubscribe(&joined.room_id, &identity.user_id);
        if let Err(e) = rooms.leave_room(&joined.room_id, &identity.user_id) {
            // Already timed out, or the room is gone
            debug!(addr = %self.addr, room = %joined.room_id, "Leave skipped: {}", e);
        }
    }
}

fn reply<T: Serialize>(value: T) -> Result<Value, ErrorBody> {
    Ok(serde_json::to_value(value)?)
}

fn parse_room(code: &str) -> Result<RoomId, ErrorBody> {
    Ok(code.parse::<RoomId>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::time::timeout;

    async fn start_relay() -> SocketAddr {
        start_relay_with(SyncConfig::default()).await.0
    }

    async fn start_relay_with(config: SyncConfig) -> (SocketAddr, PartyHub) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = PartyHub::new(config).unwrap();
        let metrics = Arc::new(RwLock::new(Metrics::new()));
        tokio::spawn(serve(listener, hub.clone(), Arc::new(DevIdentityProvider), metrics));
        (addr, hub)
    }

    /// Room started by alice directly on the hub
    fn live_room(hub: &PartyHub, max: u32) -> RoomId {
        let rooms = hub.rooms();
        let alice = Identity::new("alice", "Alice");
        let config = party_core::room::RoomConfig::new("Premiere", "https://cdn.example/film.m3u8", max);
        let room = rooms.create_room(&alice, config).unwrap();
        rooms.start_room(&room.id, &alice).unwrap();
        room.id
    }

    fn is_present(hub: &PartyHub, room_id: &RoomId, user_id: &str) -> bool {
        hub.rooms()
            .snapshot(room_id)
            .map(|snapshot| snapshot.participants.iter().any(|p| p.user_id == user_id))
            .unwrap_or(false)
    }

    struct TestClient {
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        next_id: u64,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                reader,
                writer,
                next_id: 1,
            }
        }

        async fn login(addr: SocketAddr, token: &str) -> Self {
            let mut client = Self::connect(addr).await;
            write_frame(&mut client.writer, &json!({"request_id": 0, "op": "hello", "token": token}))
                .await
                .unwrap();
            assert_eq!(client.recv().await["type"], "welcome");
            client
        }

        /// Read until a pushed message of type `kind` arrives
        async fn recv_until(&mut self, kind: &str) -> Value {
            loop {
                let message = self.recv().await;
                if message["type"] == kind {
                    return message;
                }
            }
        }

        async fn recv(&mut self) -> Value {
            let frame = timeout(Duration::from_secs(5), read_frame::<_, Value>(&mut self.reader))
                .await
                .expect("relay went quiet")
                .unwrap()
                .unwrap();
            frame.0
        }

        /// Send a request and wait for its response, collecting events on the way
        async fn call(&mut self, mut request: Value, events: &mut Vec<Value>) -> Value {
            let request_id = self.next_id;
            self.next_id += 1;
            request["request_id"] = json!(request_id);
            write_frame(&mut self.writer, &request).await.unwrap();
            loop {
                let message = self.recv().await;
                match message["type"].as_str() {
                    Some("response") if message["request_id"] == request_id => return message,
                    Some("event") => events.push(message),
                    _ => {}
                }
            }
        }
    }

    #[tokio::test]
    async fn test_requests_need_hello() {
        let addr = start_relay().await;
        let mut client = TestClient::connect(addr).await;
        let mut events = Vec::new();

        let reply = client.call(json!({"op": "list_rooms"}), &mut events).await;
        assert_eq!(reply["error"]["code"], "unauthenticated");

        write_frame(&mut client.writer, &json!({"request_id": 2, "op": "hello", "token": "nope"}))
            .await
            .unwrap();
        let reply = client.recv().await;
        assert_eq!(reply["error"]["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_host_and_guest_session() {
        let addr = start_relay().await;
        let mut events = Vec::new();

        let mut host = TestClient::connect(addr).await;
        write_frame(&mut host.writer, &json!({"request_id": 0, "op": "hello", "token": "alice:Alice"}))
            .await
            .unwrap();
        let welcome = host.recv().await;
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["identity"]["user_id"], "alice");

        let created = host
            .call(
                json!({
                    "op": "create_room",
                    "config": {
                        "title": "Premiere",
                        "media_reference": "https://cdn.example/film.m3u8",
                        "max_participants": 2
                    }
                }),
                &mut events,
            )
            .await;
        let room_id = created["result"]["id"].as_str().unwrap().to_string();
        let started = host.call(json!({"op": "start_room", "room_id": room_id}), &mut events).await;
        assert_eq!(started["result"]["room"]["status"], "live");
        host.call(json!({"op": "join_room", "room_id": room_id}), &mut events).await;

        let mut guest = TestClient::connect(addr).await;
        write_frame(&mut guest.writer, &json!({"request_id": 0, "op": "hello", "token": "bob:Bob"}))
            .await
            .unwrap();
        guest.recv().await;
        let mut guest_events = Vec::new();
        let joined = guest
            .call(json!({"op": "join_room", "room_id": room_id.to_lowercase()}), &mut guest_events)
            .await;
        assert_eq!(joined["result"]["participant"]["user_id"], "bob");

        // A forged participant id is replaced by the authenticated one
        let reported = host
            .call(
                json!({
                    "op": "report_playback",
                    "room_id": room_id,
                    "report": {
                        "participant_id": "mallory",
                        "generation": 1,
                        "position_secs": 30.0,
                        "is_playing": true,
                        "playback_rate": 1.0,
                        "reported_at_ms": party_core::current_time_ms()
                    }
                }),
                &mut events,
            )
            .await;
        assert_eq!(reported["result"]["accepted"], true);
        assert_eq!(reported["result"]["change"], "play");

        let play = loop {
            let message = guest.recv().await;
            if message["type"] == "event"
                && message["event"]["type"] == "sync_correction"
                && message["event"]["reason"] == "play"
            {
                break message;
            }
        };
        assert_eq!(play["event"]["state"]["source_participant_id"], "alice");
        assert_eq!(play["event"]["state"]["position_secs"], 30.0);

        // Dropping the guest's socket leaves the room
        drop(guest);
        let mut left = false;
        for _ in 0..50 {
            let snapshot = host.call(json!({"op": "snapshot", "room_id": room_id}), &mut events).await;
            if snapshot["result"]["participants"].as_array().unwrap().len() == 1 {
                left = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(left);
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let addr = start_relay().await;
        let mut client = TestClient::connect(addr).await;

        let garbage = b"{\"op\": 42}";
        client.writer.write_u32(garbage.len() as u32).await.unwrap();
        client.writer.write_all(garbage).await.unwrap();
        let reply = client.recv().await;
        assert_eq!(reply["error"]["code"], "bad_request");

        write_frame(&mut client.writer, &json!({"request_id": 1, "op": "hello", "token": "carol:Carol"}))
            .await
            .unwrap();
        assert_eq!(client.recv().await["type"], "welcome");

        let mut events = Vec::new();
        client.next_id = 2;
        let reply = client.call(json!({"op": "list_rooms"}), &mut events).await;
        assert_eq!(reply["result"], json!([]));
    }

    #[tokio::test]
    async fn test_slow_reader_is_told_and_can_resume() {
        let config = SyncConfig {
            history_capacity: 4,
            replay_count: 2,
            ..SyncConfig::default()
        };
        let (addr, hub) = start_relay_with(config).await;
        let room_id = live_room(&hub, 5);

        let mut bob = TestClient::login(addr, "bob:Bob").await;
        let mut events = Vec::new();
        bob.call(json!({"op": "join_room", "room_id": room_id.as_str()}), &mut events)
            .await;

        // Nothing yields in between, so bob's queue overflows
        let rooms = hub.rooms();
        for i in 0..50 {
            rooms
                .send_message(&room_id, "alice", format!("line {}", i), None, None)
                .unwrap();
        }
        assert_eq!(hub.events().subscriber_count(&room_id), 0);

        let notice = bob.recv_until("unsubscribed").await;
        assert_eq!(notice["room_id"], room_id.as_str());
        let last_seq = notice["last_seq"].as_u64().unwrap();
        assert!(last_seq < hub.events().latest_seq(&room_id).unwrap());
        assert!(is_present(&hub, &room_id, "bob"));

        let resumed = bob
            .call(
                json!({"op": "join_room", "room_id": room_id.as_str(), "since": last_seq}),
                &mut events,
            )
            .await;
        assert_eq!(resumed["result"]["gap"], true);

        rooms
            .send_message(&room_id, "alice", "still there?", None, None)
            .unwrap();
        let delivered = loop {
            let event = bob.recv_until("event").await;
            if event["event"]["body"]["content"] == "still there?" {
                break event;
            }
        };
        assert!(delivered["seq"].as_u64().unwrap() > last_seq);
    }

    #[tokio::test]
    async fn test_refused_switch_keeps_current_room() {
        let (addr, hub) = start_relay_with(SyncConfig::default()).await;
        let current = live_room(&hub, 5);
        let full = live_room(&hub, 1);

        let mut bob = TestClient::login(addr, "bob:Bob").await;
        let mut events = Vec::new();
        bob.call(json!({"op": "join_room", "room_id": current.as_str()}), &mut events)
            .await;

        let refused = bob
            .call(json!({"op": "join_room", "room_id": full.as_str()}), &mut events)
            .await;
        assert_eq!(refused["error"]["code"], "room_full");
        assert!(is_present(&hub, &current, "bob"));

        hub.rooms()
            .send_message(&current, "alice", "welcome back", None, None)
            .unwrap();
        loop {
            let event = bob.recv_until("event").await;
            if event["event"]["body"]["content"] == "welcome back" {
                assert_eq!(event["room_id"], current.as_str());
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_started_room_is_left_on_disconnect() {
        let (addr, hub) = start_relay_with(SyncConfig::default()).await;
        let mut alice = TestClient::login(addr, "alice:Alice").await;
        let mut events = Vec::new();

        let created = alice
            .call(
                json!({
                    "op": "create_room",
                    "config": {
                        "title": "Premiere",
                        "media_reference": "https://cdn.example/film.m3u8",
                        "max_participants": 2
                    }
                }),
                &mut events,
            )
            .await;
        let room_id: RoomId = created["result"]["id"].as_str().unwrap().parse().unwrap();
        let started = alice
            .call(json!({"op": "start_room", "room_id": room_id.as_str()}), &mut events)
            .await;
        assert_eq!(started["result"]["host_id"], "alice");
        assert_eq!(hub.events().subscriber_count(&room_id), 1);

        drop(alice);
        let mut left = false;
        for _ in 0..50 {
            if !is_present(&hub, &room_id, "alice") {
                left = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(left);
    }
}
