//! The three-socket quorum engine.
//!
//! The engine owns one socket slot per peer connection. Requests fan out
//! to every slot; responses come back tagged with the slot and are
//! matched to their round by the echoed request timestamp. Computer
//! state is polled on a fixed cadence and settled by signature
//! agreement; transfer-status polls walk all 676 computor indices and
//! settle on the 451 threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::select;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use quorus_codec::state::ComputerStateRecord;
use quorus_codec::status::{StatusSlab, Vote};
use quorus_codec::{NUMBER_OF_COMPUTORS, NUMBER_OF_CONNECTIONS};
use quorus_crypto::key::ed25519::PublicKey;

use crate::bearer::{Bearer, FrameBuffer};
use crate::protocol::state_verify::Snapshot;
use crate::protocol::status_verify::StatusCounts;
use crate::protocol::status_verify::StatusTracker;
use crate::protocol::{self, Inbound};
use crate::quorum::Agreement;
use crate::DEFAULT_PORT;

const OUTBOUND_BUFFER: usize = 1024;
const INGRESS_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 512;

/// Spacing between the per-computor requests of one status poll.
pub const STATUS_REQUEST_SPACING: Duration = Duration::from_millis(100);

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_SYNC_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub peers: [String; NUMBER_OF_CONNECTIONS],
    pub admin_public_key: PublicKey,
    pub connection_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub computer_state_sync_timeout: Duration,
    pub computer_state_sync_delay: Duration,
}

impl EngineConfig {
    pub fn new(peers: [String; NUMBER_OF_CONNECTIONS], admin_public_key: PublicKey) -> Self {
        Self {
            peers,
            admin_public_key,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            computer_state_sync_timeout: DEFAULT_SYNC_TIMEOUT,
            computer_state_sync_delay: DEFAULT_SYNC_DELAY,
        }
    }
}

#[derive(Debug)]
pub enum Command {
    /// Fan a pre-built frame out to every socket.
    BroadcastTransfer(Vec<u8>),
    /// Begin a transfer-status poll across all computor indices.
    PollStatus { hash: [u8; 32] },
    /// Swap one slot to a new peer; a no-op when the address is unchanged.
    SetPeer { slot: usize, peer: String },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum Event {
    SocketOpen {
        slot: usize,
        peer: String,
    },
    SocketClose {
        slot: usize,
        peer: String,
    },
    /// Computer-state progress for the current round: 0 on desync, then
    /// 1..=3 as matching responses accumulate.
    Info {
        status: usize,
        epoch: u16,
        tick: u32,
        peers: Vec<String>,
    },
    /// Three computer-state responses arrived with no matching pair.
    InvalidResponses,
    TransferStatus {
        hash: [u8; 32],
        counts: StatusCounts,
        epoch: u16,
        tick: u32,
    },
    /// A status poll crossed the processed threshold; the receipt is
    /// assembled and polling for this hash has stopped.
    TransferProcessed {
        hash: [u8; 32],
        receipt: Vec<u8>,
    },
}

/// Command/event surface handed to the embedder while the engine task
/// owns the sockets.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl EngineHandle {
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

enum SlotEvent {
    Opened {
        slot: usize,
        generation: u64,
    },
    Closed {
        slot: usize,
        generation: u64,
    },
    Frame {
        slot: usize,
        generation: u64,
        kind: u16,
        payload: Vec<u8>,
    },
}

struct Slot {
    peer: String,
    generation: u64,
    outbound: mpsc::Sender<Vec<u8>>,
    open: bool,
}

struct StateRound {
    timestamp: u64,
    agreement: Agreement,
    snapshots: Vec<Snapshot>,
    reported: usize,
    contested_reported: bool,
}

impl StateRound {
    fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            agreement: Agreement::new(),
            snapshots: Vec::with_capacity(NUMBER_OF_CONNECTIONS),
            reported: 0,
            contested_reported: false,
        }
    }
}

struct Poll {
    frames: Vec<Vec<u8>>,
    tracker: StatusTracker,
    cancel: Arc<AtomicBool>,
}

pub struct Engine {
    cfg: EngineConfig,
    slots: Vec<Slot>,
    generations: u64,
    ingress_tx: mpsc::Sender<SlotEvent>,
    ingress_rx: mpsc::Receiver<SlotEvent>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
    round: Option<StateRound>,
    snapshot: Option<Snapshot>,
    last_agreement: Instant,
    desynced: bool,
    polls: HashMap<u64, Poll>,
    public_peers: VecDeque<std::net::Ipv4Addr>,
    last_request_timestamp: u64,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> (Self, EngineHandle) {
        let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let slots = cfg
            .peers
            .iter()
            .map(|peer| {
                // placeholder channel until the slot task is spawned
                let (outbound, _) = mpsc::channel(OUTBOUND_BUFFER);
                Slot {
                    peer: peer.clone(),
                    generation: 0,
                    outbound,
                    open: false,
                }
            })
            .collect();

        let handle = EngineHandle {
            commands: command_tx,
            events: event_tx.clone(),
        };

        let engine = Self {
            cfg,
            slots,
            generations: 0,
            ingress_tx,
            ingress_rx,
            commands: command_rx,
            events: event_tx,
            round: None,
            snapshot: None,
            last_agreement: Instant::now(),
            desynced: false,
            polls: HashMap::new(),
            public_peers: VecDeque::new(),
            last_request_timestamp: 0,
        };

        (engine, handle)
    }

    pub async fn run(mut self) {
        self.last_agreement = Instant::now();

        for slot in 0..self.slots.len() {
            self.spawn_slot(slot, Duration::ZERO);
        }

        let mut sync_interval = tokio::time::interval(self.cfg.computer_state_sync_timeout);
        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = sync_interval.tick() => self.begin_state_round(),
                Some(event) = self.ingress_rx.recv() => self.on_slot_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        debug!("engine shutting down");
                        break;
                    }
                    Some(command) => self.on_command(command),
                },
            }
        }

        // dropping the slots tears down the outbound channels; the slot
        // tasks exit on their next receive
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::BroadcastTransfer(frame) => self.fan_out(&frame),
            Command::PollStatus { hash } => self.start_poll(hash),
            Command::SetPeer { slot, peer } => {
                if slot >= self.slots.len() {
                    warn!(slot, "set_peer on unknown slot");
                    return;
                }

                if self.slots[slot].peer == peer {
                    debug!(slot, %peer, "peer unchanged");
                    return;
                }

                self.slots[slot].peer = peer;
                self.restart_slot(slot);
            }
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn on_slot_event(&mut self, event: SlotEvent) {
        match event {
            SlotEvent::Opened { slot, generation } => {
                if self.slots[slot].generation != generation {
                    return;
                }

                self.slots[slot].open = true;
                let peer = self.slots[slot].peer.clone();
                debug!(slot, %peer, "socket open");
                let _ = self.events.send(Event::SocketOpen { slot, peer });

                // a fresh socket resumes live polls, then asks for gossip
                let replays: Vec<Vec<u8>> = self
                    .polls
                    .values()
                    .flat_map(|poll| poll.frames.iter().cloned())
                    .collect();

                for frame in replays {
                    self.send_to(slot, frame);
                }

                self.send_to(slot, protocol::peer_exchange_request());
            }
            SlotEvent::Closed { slot, generation } => {
                if self.slots[slot].generation != generation {
                    return;
                }

                self.slots[slot].open = false;
                let peer = self.slots[slot].peer.clone();
                debug!(slot, %peer, "socket closed");
                let _ = self.events.send(Event::SocketClose { slot, peer });

                // rotate to the next gossiped peer when one is queued
                if let Some(next) = self.public_peers.pop_front() {
                    self.slots[slot].peer = format!("{next}:{DEFAULT_PORT}");
                }

                if self.public_peers.is_empty() {
                    self.request_peer_refill();
                }

                self.spawn_slot(slot, self.cfg.reconnect_timeout);
            }
            SlotEvent::Frame {
                slot,
                generation,
                kind,
                payload,
            } => {
                if self.slots[slot].generation != generation {
                    return;
                }

                match protocol::parse_inbound(kind, &payload) {
                    Ok(Some(inbound)) => self.on_inbound(inbound),
                    Ok(None) => trace!(kind, "ignoring unknown frame kind"),
                    Err(err) => {
                        debug!(slot, ?err, "malformed frame, restarting socket");
                        self.restart_slot(slot);
                    }
                }
            }
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::ComputerState { timestamp, record } => {
                self.on_computer_state(timestamp, record)
            }
            Inbound::TransferStatus { timestamp, slab } => {
                self.on_transfer_status(timestamp, slab)
            }
            Inbound::PublicPeers(addresses) => {
                for address in addresses {
                    if !self.public_peers.contains(&address) {
                        trace!(%address, "gossiped public peer queued");
                        self.public_peers.push_back(address);
                    }
                }
            }
        }
    }

    fn on_computer_state(&mut self, timestamp: u64, record: ComputerStateRecord) {
        let admin = self.cfg.admin_public_key;

        let Some(round) = self.round.as_mut() else {
            return;
        };

        if round.timestamp != timestamp {
            trace!("computer-state response for an expired round");
            return;
        }

        if round.agreement.is_full() {
            return;
        }

        // verify before the record can influence the tally
        let snapshot = match Snapshot::verify(record, &admin) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(?err, "rejected computer-state record");
                return;
            }
        };

        let status = round
            .agreement
            .insert(snapshot.record().signature().to_vec());
        round.snapshots.push(snapshot);

        let contested = round.agreement.is_contested() && !round.contested_reported;
        if contested {
            round.contested_reported = true;
        }

        let advanced = status > round.reported;
        let adopted = if advanced {
            round.reported = status;

            if status >= 2 {
                Some(round.snapshots[round.agreement.anchor()].clone())
            } else {
                None
            }
        } else {
            None
        };

        if contested {
            warn!("three computer-state responses with no matching pair");
            let _ = self.events.send(Event::InvalidResponses);
        }

        if let Some(snapshot) = adopted {
            self.last_agreement = Instant::now();
            self.desynced = false;
            self.snapshot = Some(snapshot);
        }

        if advanced {
            self.publish_info(status);
        }
    }

    fn on_transfer_status(&mut self, timestamp: u64, slab: StatusSlab) {
        let Some(snapshot) = self.snapshot.as_ref() else {
            trace!("status slab before any computer state is known");
            return;
        };

        let Some(poll) = self.polls.get_mut(&timestamp) else {
            trace!("status response for an unknown poll");
            return;
        };

        match poll.tracker.insert(slab, snapshot) {
            Ok(Some(counts)) => {
                let hash = *poll.tracker.hash();

                let _ = self.events.send(Event::TransferStatus {
                    hash,
                    counts,
                    epoch: snapshot.epoch(),
                    tick: snapshot.tick(),
                });

                if poll.tracker.is_concluded() {
                    poll.cancel.store(true, Ordering::Relaxed);

                    if poll.tracker.concluded() == Some(Vote::Processed) {
                        let receipt = poll.tracker.assemble_receipt(snapshot);
                        let _ = self.events.send(Event::TransferProcessed { hash, receipt });
                    }

                    self.polls.remove(&timestamp);
                }
            }
            Ok(None) => {}
            Err(err) => debug!(?err, "rejected status slab"),
        }
    }

    fn begin_state_round(&mut self) {
        let desync_after =
            self.cfg.computer_state_sync_timeout + self.cfg.computer_state_sync_delay;

        if !self.desynced && self.last_agreement.elapsed() > desync_after {
            self.desynced = true;
            warn!("no computer-state agreement within the desync window");
            self.publish_info(0);
        }

        // the previous round's response table is dropped with it
        let timestamp = self.next_request_timestamp();
        self.round = Some(StateRound::new(timestamp));

        self.fan_out(&protocol::computer_state_request(timestamp));
    }

    fn start_poll(&mut self, hash: [u8; 32]) {
        if self.polls.values().any(|poll| poll.tracker.hash() == &hash) {
            debug!("status poll for this hash is already live");
            return;
        }

        let timestamp = self.next_request_timestamp();

        let frames: Vec<Vec<u8>> = (0..NUMBER_OF_COMPUTORS as u16)
            .map(|computor| protocol::transfer_status_request(timestamp, &hash, computor))
            .collect();

        let cancel = Arc::new(AtomicBool::new(false));

        let outbounds: Vec<mpsc::Sender<Vec<u8>>> =
            self.slots.iter().map(|slot| slot.outbound.clone()).collect();

        let pacer_frames = frames.clone();
        let pacer_cancel = cancel.clone();

        // the pacer walks the computor indices in order, one request per
        // spacing interval, without stalling the engine loop
        tokio::spawn(async move {
            for frame in pacer_frames {
                if pacer_cancel.load(Ordering::Relaxed) {
                    break;
                }

                for outbound in &outbounds {
                    let _ = outbound.try_send(frame.clone());
                }

                tokio::time::sleep(STATUS_REQUEST_SPACING).await;
            }
        });

        self.polls.insert(
            timestamp,
            Poll {
                frames,
                tracker: StatusTracker::new(hash),
                cancel,
            },
        );
    }

    fn publish_info(&self, status: usize) {
        let (epoch, tick) = self
            .snapshot
            .as_ref()
            .map(|snapshot| (snapshot.epoch(), snapshot.tick()))
            .unwrap_or_default();

        let peers = self.slots.iter().map(|slot| slot.peer.clone()).collect();

        let _ = self.events.send(Event::Info {
            status,
            epoch,
            tick,
            peers,
        });
    }

    fn fan_out(&self, frame: &[u8]) {
        for slot in &self.slots {
            if slot.outbound.try_send(frame.to_vec()).is_err() {
                trace!(peer = %slot.peer, "outbound channel unavailable");
            }
        }
    }

    fn send_to(&self, slot: usize, frame: Vec<u8>) {
        if self.slots[slot].outbound.try_send(frame).is_err() {
            trace!(slot, "outbound channel unavailable");
        }
    }

    fn request_peer_refill(&self) {
        if let Some(slot) = self.slots.iter().position(|slot| slot.open) {
            self.send_to(slot, protocol::peer_exchange_request());
        }
    }

    fn restart_slot(&mut self, slot: usize) {
        let peer = self.slots[slot].peer.clone();
        self.slots[slot].open = false;
        let _ = self.events.send(Event::SocketClose { slot, peer });
        self.spawn_slot(slot, self.cfg.reconnect_timeout);
    }

    fn spawn_slot(&mut self, slot: usize, delay: Duration) {
        self.generations += 1;
        let generation = self.generations;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

        self.slots[slot].generation = generation;
        self.slots[slot].outbound = outbound_tx;
        self.slots[slot].open = false;

        let runtime = SlotRuntime {
            slot,
            generation,
            peer: self.slots[slot].peer.clone(),
            delay,
            connection_timeout: self.cfg.connection_timeout,
            outbound: outbound_rx,
            ingress: self.ingress_tx.clone(),
        };

        tokio::spawn(run_slot(runtime));
    }

    fn next_request_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);

        if now <= self.last_request_timestamp {
            self.last_request_timestamp += 1;
        } else {
            self.last_request_timestamp = now;
        }

        self.last_request_timestamp
    }
}

struct SlotRuntime {
    slot: usize,
    generation: u64,
    peer: String,
    delay: Duration,
    connection_timeout: Duration,
    outbound: mpsc::Receiver<Vec<u8>>,
    ingress: mpsc::Sender<SlotEvent>,
}

async fn run_slot(mut runtime: SlotRuntime) {
    let slot = runtime.slot;
    let generation = runtime.generation;

    if !runtime.delay.is_zero() {
        tokio::time::sleep(runtime.delay).await;
    }

    let connect = Bearer::connect(runtime.peer.as_str());

    let bearer = match timeout(runtime.connection_timeout, connect).await {
        Ok(Ok(bearer)) => bearer,
        Ok(Err(err)) => {
            debug!(slot, peer = %runtime.peer, ?err, "connect failed");
            let _ = runtime
                .ingress
                .send(SlotEvent::Closed { slot, generation })
                .await;
            return;
        }
        Err(_) => {
            debug!(slot, peer = %runtime.peer, "connect timed out");
            let _ = runtime
                .ingress
                .send(SlotEvent::Closed { slot, generation })
                .await;
            return;
        }
    };

    let _ = runtime
        .ingress
        .send(SlotEvent::Opened { slot, generation })
        .await;

    let mut buffer = FrameBuffer::new(bearer);

    loop {
        select! {
            inbound = buffer.read_frame() => match inbound {
                Ok((kind, payload)) => {
                    let forwarded = runtime
                        .ingress
                        .send(SlotEvent::Frame { slot, generation, kind, payload })
                        .await;

                    if forwarded.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(slot, ?err, "bearer failed");
                    break;
                }
            },
            frame = runtime.outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = buffer.write_frame(&frame).await {
                        debug!(slot, ?err, "bearer write failed");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = runtime
        .ingress
        .send(SlotEvent::Closed { slot, generation })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tokio::net::TcpListener;

    use quorus_codec::framing;
    use quorus_codec::state::{compose, ADMIN_INDEX, SIGNED_REGION_LENGTH};
    use quorus_crypto::hash::Hasher;
    use quorus_crypto::key::ed25519::SecretKey;

    fn admin() -> SecretKey {
        SecretKey::from([1; 32])
    }

    fn signed_state(epoch: u16, tick: u32) -> Vec<u8> {
        let keys = vec![[0u8; 32]; NUMBER_OF_COMPUTORS];
        let mut bytes = compose(ADMIN_INDEX, epoch, tick, 0, &keys);

        let digest = Hasher::<32>::hash(&bytes[..SIGNED_REGION_LENGTH]);
        bytes[SIGNED_REGION_LENGTH..].copy_from_slice(admin().sign(digest).as_ref());

        bytes
    }

    /// One fake computor: answers computer-state requests with `state`,
    /// peer exchanges with an empty list, and counts transfer broadcasts.
    async fn serve(listener: TcpListener, state: Vec<u8>, broadcasts: Arc<AtomicUsize>) {
        loop {
            let Ok((bearer, _)) = Bearer::accept(&listener).await else {
                return;
            };

            let state = state.clone();
            let broadcasts = broadcasts.clone();

            tokio::spawn(async move {
                let mut buffer = FrameBuffer::new(bearer);

                while let Ok((kind, payload)) = buffer.read_frame().await {
                    match kind {
                        framing::SUB_TYPED => {
                            if let Some(timestamp) =
                                protocol::parse_computer_state_request(&payload)
                            {
                                let frame = protocol::sub_typed_response(timestamp, &state);
                                if buffer.write_frame(&frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                        framing::EXCHANGE_PUBLIC_PEERS => {
                            let frame = framing::build_frame(framing::EXCHANGE_PUBLIC_PEERS, &[]);
                            if buffer.write_frame(&frame).await.is_err() {
                                return;
                            }
                        }
                        framing::BROADCAST_TRANSFER => {
                            broadcasts.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {}
                    }
                }
            });
        }
    }

    async fn spawn_peer(state: Vec<u8>, broadcasts: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(serve(listener, state, broadcasts));

        addr.to_string()
    }

    async fn next_info(events: &mut broadcast::Receiver<Event>) -> (usize, u16, u32) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for an info event")
                .expect("event channel closed");

            if let Event::Info {
                status,
                epoch,
                tick,
                ..
            } = event
            {
                return (status, epoch, tick);
            }
        }
    }

    fn test_config(peers: [String; 3]) -> EngineConfig {
        let mut cfg = EngineConfig::new(peers, admin().public_key());
        cfg.computer_state_sync_timeout = Duration::from_millis(200);
        cfg.computer_state_sync_delay = Duration::from_secs(30);
        cfg
    }

    #[tokio::test]
    async fn unanimous_peers_walk_status_one_two_three() {
        let state = signed_state(1, 2);
        let broadcasts = Arc::new(AtomicUsize::new(0));

        let peers = [
            spawn_peer(state.clone(), broadcasts.clone()).await,
            spawn_peer(state.clone(), broadcasts.clone()).await,
            spawn_peer(state, broadcasts).await,
        ];

        let (engine, handle) = Engine::new(test_config(peers));
        let mut events = handle.subscribe();
        tokio::spawn(engine.run());

        assert_eq!(next_info(&mut events).await.0, 1);
        assert_eq!(next_info(&mut events).await, (2, 1, 2));
        assert_eq!(next_info(&mut events).await, (3, 1, 2));

        // the next round walks the ladder again
        assert_eq!(next_info(&mut events).await.0, 1);
        assert_eq!(next_info(&mut events).await.0, 2);
        assert_eq!(next_info(&mut events).await.0, 3);

        handle.send(Command::Shutdown).await;
    }

    #[tokio::test]
    async fn disagreeing_third_peer_caps_status_at_two() {
        let matching = signed_state(1, 2);
        let lagging = signed_state(1, 1);
        let broadcasts = Arc::new(AtomicUsize::new(0));

        let peers = [
            spawn_peer(matching.clone(), broadcasts.clone()).await,
            spawn_peer(matching, broadcasts.clone()).await,
            spawn_peer(lagging, broadcasts).await,
        ];

        let (engine, handle) = Engine::new(test_config(peers));
        let mut events = handle.subscribe();
        tokio::spawn(engine.run());

        // two full rounds: the ladder reaches 2 and restarts without
        // ever reaching 3
        let mut statuses = Vec::new();
        for _ in 0..4 {
            statuses.push(next_info(&mut events).await.0);
        }

        assert!(statuses.contains(&2));
        assert!(!statuses.contains(&3));

        handle.send(Command::Shutdown).await;
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let state = signed_state(1, 2);
        let broadcasts = Arc::new(AtomicUsize::new(0));

        let peers = [
            spawn_peer(state.clone(), broadcasts.clone()).await,
            spawn_peer(state.clone(), broadcasts.clone()).await,
            spawn_peer(state, broadcasts.clone()).await,
        ];

        let (engine, handle) = Engine::new(test_config(peers));
        let mut events = handle.subscribe();
        tokio::spawn(engine.run());

        // wait until every socket reports open
        let mut open = 0;
        while open < 3 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for sockets")
                .expect("event channel closed");

            if matches!(event, Event::SocketOpen { .. }) {
                open += 1;
            }
        }

        let frame = framing::build_frame(framing::BROADCAST_TRANSFER, &[5; 144]);
        assert!(handle.send(Command::BroadcastTransfer(frame)).await);

        let deadline = Instant::now() + Duration::from_secs(5);
        while broadcasts.load(Ordering::Relaxed) < 3 {
            assert!(Instant::now() < deadline, "broadcast did not reach all peers");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        handle.send(Command::Shutdown).await;
    }
}
