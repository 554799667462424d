use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use chisel_protocol::{ClientPacket, ServerPacket, StringMode};
use chisel_types::{CpeExtension, FixedPos, Username};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A policy violation with a reason the client is allowed to see.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ClientError(pub String);

impl ClientError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// What the per-connection writer task consumes.
#[derive(Debug)]
pub enum Outbound {
    Packet(ServerPacket),
    /// Flush and close the socket after everything queued so far.
    Close,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for packet 0x{0:02X}")]
    TimedOut(u8),
    #[error("connection closed while waiting for packet 0x{0:02X}")]
    Cancelled(u8),
}

/// Optional packet predicate attached to a subscription; a waiter only
/// accepts packets its filter passes.
pub type Filter = Box<dyn Fn(&ClientPacket) -> bool + Send + Sync>;

struct Waiter {
    tx: oneshot::Sender<ClientPacket>,
    handle_update: bool,
    filter: Option<Filter>,
}

/// One-shot wait-for-next-packet subscriptions, keyed by packet id.
/// The next matching packet goes to exactly one subscriber (FIFO); the
/// normal handler additionally runs only if the subscriber asked for it.
#[derive(Default)]
pub struct Subscriptions {
    waiters: Mutex<HashMap<u8, VecDeque<Waiter>>>,
}

/// What the receive loop should do after offering a packet around.
pub struct OfferOutcome {
    pub delivered: bool,
    pub run_handler: bool,
}

impl Subscriptions {
    fn subscribe(
        &self,
        id: u8,
        handle_update: bool,
        filter: Option<Filter>,
    ) -> oneshot::Receiver<ClientPacket> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push_back(Waiter {
                tx,
                handle_update,
                filter,
            });
        rx
    }

    /// Offer a decoded packet to the first live, matching subscriber.
    pub fn offer(&self, id: u8, packet: &ClientPacket) -> OfferOutcome {
        let mut waiters = self.waiters.lock().unwrap();
        let Some(queue) = waiters.get_mut(&id) else {
            return OfferOutcome {
                delivered: false,
                run_handler: true,
            };
        };
        // Timed-out subscribers leave a closed sender behind; drop them
        // as they surface.
        while let Some(front) = queue.front() {
            if front.tx.is_closed() {
                queue.pop_front();
                continue;
            }
            if let Some(filter) = &front.filter {
                if !filter(packet) {
                    // Not this subscriber's packet; nobody behind it may
                    // jump the queue.
                    return OfferOutcome {
                        delivered: false,
                        run_handler: true,
                    };
                }
            }
            let waiter = queue.pop_front().expect("front exists");
            let run_handler = waiter.handle_update;
            let _ = waiter.tx.send(packet.clone());
            return OfferOutcome {
                delivered: true,
                run_handler,
            };
        }
        OfferOutcome {
            delivered: false,
            run_handler: true,
        }
    }

    /// Drop every pending subscription; their receivers observe a
    /// cancellation error.
    pub fn cancel_all(&self) {
        self.waiters.lock().unwrap().clear();
    }
}

/// Typed per-player extension storage. Each feature module owns its key
/// string and value type; a type mismatch reads as absent.
#[derive(Default)]
pub struct ExtBag {
    values: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl ExtBag {
    pub fn set<T: Send + Sync + 'static>(&self, key: &'static str, value: T) {
        self.values.lock().unwrap().insert(key, Box::new(value));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &'static str) -> Option<T> {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }
}

struct PlayerState {
    pos: FixedPos,
    world: Option<String>,
    player_id: Option<u8>,
}

/// One connected session. Identity and the negotiated CPE set are fixed
/// at construction; position and world membership live behind a lock.
pub struct Player {
    pub username: Username,
    pub display_name: String,
    pub verification_key: String,
    pub addr: SocketAddr,
    pub cpe: HashSet<CpeExtension>,
    pub ext: ExtBag,
    pub subscriptions: Subscriptions,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Mutex<PlayerState>,
}

impl Player {
    pub fn new(
        username: Username,
        display_name: String,
        verification_key: String,
        addr: SocketAddr,
        cpe: HashSet<CpeExtension>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            username,
            display_name,
            verification_key,
            addr,
            cpe,
            ext: ExtBag::default(),
            subscriptions: Subscriptions::default(),
            outbound,
            state: Mutex::new(PlayerState {
                pos: FixedPos::ZERO,
                world: None,
                player_id: None,
            }),
        }
    }

    pub fn supports(&self, name: &str, version: i32) -> bool {
        self.cpe.contains(&CpeExtension::new(name, version))
    }

    /// Outbound strings may use the full CP437 table only once both
    /// FullCP437 and EmoteFix were negotiated.
    pub fn string_mode(&self) -> StringMode {
        if self.supports("FullCP437", 1) && self.supports("EmoteFix", 1) {
            StringMode::FullCp437
        } else {
            StringMode::Ascii
        }
    }

    pub fn pos(&self) -> FixedPos {
        self.state.lock().unwrap().pos
    }

    pub fn set_pos(&self, pos: FixedPos) {
        self.state.lock().unwrap().pos = pos;
    }

    pub fn world_name(&self) -> Option<String> {
        self.state.lock().unwrap().world.clone()
    }

    pub fn player_id(&self) -> Option<u8> {
        self.state.lock().unwrap().player_id
    }

    pub fn enter_world(&self, world: &str, player_id: u8, pos: FixedPos) {
        let mut state = self.state.lock().unwrap();
        state.world = Some(world.to_string());
        state.player_id = Some(player_id);
        state.pos = pos;
    }

    pub fn leave_world(&self) {
        let mut state = self.state.lock().unwrap();
        state.world = None;
        state.player_id = None;
    }

    /// Queue a packet for the writer task. Returns false when the
    /// connection is already gone; fan-out callers treat that as a
    /// transient error and keep going.
    pub fn send_packet(&self, packet: ServerPacket) -> bool {
        if self.outbound.send(Outbound::Packet(packet)).is_err() {
            debug!(player = %self.username, "dropping packet for closed connection");
            return false;
        }
        true
    }

    /// Send a chat line, chunked to the 64-byte wire limit.
    pub fn send_message(&self, message: &str) {
        for chunk in chunk_message(message) {
            self.send_packet(ServerPacket::Message {
                player_id: 0,
                message: chunk,
            });
        }
    }

    /// Disconnect with a reason. The writer flushes everything queued
    /// before it, then closes the socket.
    pub fn close(&self, reason: Option<&str>) {
        if let Some(reason) = reason {
            self.send_packet(ServerPacket::DisconnectPlayer {
                reason: reason.to_string(),
            });
        }
        let _ = self.outbound.send(Outbound::Close);
        self.subscriptions.cancel_all();
    }

    /// Wait for the next inbound packet with this id. The packet still
    /// flows through the normal handler only if `handle_update` is set.
    /// The subscription registers immediately, before the returned
    /// future is first polled.
    pub fn next_packet(
        &self,
        id: u8,
        deadline: Duration,
        handle_update: bool,
        filter: Option<Filter>,
    ) -> impl std::future::Future<Output = Result<ClientPacket, WaitError>> {
        let rx = self.subscriptions.subscribe(id, handle_update, filter);
        async move {
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(packet)) => Ok(packet),
                Ok(Err(_)) => Err(WaitError::Cancelled(id)),
                Err(_) => Err(WaitError::TimedOut(id)),
            }
        }
    }
}

/// Split a message into 64-character lines the fixed-size codec can
/// carry. Color state does not carry across lines; the original keeps
/// this simple and so do we.
pub fn chunk_message(message: &str) -> Vec<String> {
    if message.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = message.chars().collect();
    chars
        .chunks(64)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Every connected player, across all worlds.
pub struct PlayerManager {
    players: Mutex<HashMap<Username, std::sync::Arc<Player>>>,
}

impl PlayerManager {
    pub fn new() -> Self {
        Self {
            players: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(
        &self,
        player: std::sync::Arc<Player>,
        max_players: usize,
    ) -> Result<(), ClientError> {
        let mut players = self.players.lock().unwrap();
        if players.len() >= max_players {
            return Err(ClientError::new("Server Is Full!"));
        }
        if players.contains_key(&player.username) {
            return Err(ClientError::new("This Username Is Already Taken"));
        }
        players.insert(player.username.clone(), player);
        Ok(())
    }

    pub fn remove(&self, username: &Username) -> Option<std::sync::Arc<Player>> {
        self.players.lock().unwrap().remove(username)
    }

    pub fn get(&self, username: &Username) -> Option<std::sync::Arc<Player>> {
        self.players.lock().unwrap().get(username).cloned()
    }

    pub fn players(&self) -> Vec<std::sync::Arc<Player>> {
        self.players.lock().unwrap().values().cloned().collect()
    }

    pub fn by_ip(&self, ip: &str) -> Vec<std::sync::Arc<Player>> {
        self.players
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.addr.ip().to_string() == ip)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.players.lock().unwrap().len()
    }

    /// Fan a packet out to every connected player. Individual failures
    /// are logged and skipped; the loop always finishes.
    pub fn send_global_packet(&self, packet: &ServerPacket, ignore: &[&Username]) {
        for player in self.players() {
            if ignore.contains(&&player.username) {
                continue;
            }
            if !player.send_packet(packet.clone()) {
                warn!(player = %player.username, "global send failed, skipping");
            }
        }
    }

    pub fn send_global_message(&self, message: &str, ignore: &[&Username]) {
        for player in self.players() {
            if ignore.contains(&&player.username) {
                continue;
            }
            player.send_message(message);
        }
    }

    pub fn kick(&self, username: &Username, reason: &str) -> bool {
        match self.get(username) {
            Some(player) => {
                debug!(player = %username, reason, "kicking player");
                player.close(Some(reason));
                true
            }
            None => false,
        }
    }

    pub fn kick_ip(&self, ip: &str, reason: &str) -> usize {
        let players = self.by_ip(ip);
        for player in &players {
            player.close(Some(reason));
        }
        players.len()
    }
}

impl Default for PlayerManager {
    fn default() -> Self {
        Self::new()
    }
}
