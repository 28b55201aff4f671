//! The client facade and its core task.
//!
//! The facade owns nothing but channels: the core task holds the ledger,
//! the identity and the engine handle, so every field has exactly one
//! mutator. Public operations are forwarded as commands and answered
//! over oneshot replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use quorus_codec::transfer::TransferRecord;
use quorus_codec::{NUMBER_OF_COMPUTORS, NUMBER_OF_CONNECTIONS};
use quorus_crypto::hash::{Hash, Hasher};
use quorus_crypto::key::ed25519::PublicKey;
use quorus_network::engine::{
    self, Command as EngineCommand, Engine, EngineHandle, STATUS_REQUEST_SPACING,
};
use quorus_network::protocol;
use quorus_store::ledger::{Error as LedgerError, Ledger, LedgerRecord, ReplayVerdict};

use crate::config::Config;
use crate::events::{ClientEvent, ComputerStateInfo};
use crate::identity::{self, Identity};
use crate::receipt;
use crate::timestamp::{self, MonotonicClock};
use crate::transfer::{self, TransferSummary, MIN_ENERGY_AMOUNT};
use crate::Error;

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;

/// An unprocessed transfer this old (in timestamp units) is re-broadcast
/// once at launch.
const STALE_AFTER: u64 = 60 * timestamp::UNIT;

/// A transfer's status poll is repeated no more often than one full
/// request sweep, twice over.
fn poll_backoff() -> Duration {
    STATUS_REQUEST_SPACING * NUMBER_OF_COMPUTORS as u32 * 2
}

enum CoreCommand {
    Transfer {
        destination: String,
        energy: u64,
        reply: oneshot::Sender<Result<TransferSummary, Error>>,
    },
    ImportReceipt {
        encoded: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    SetPeer {
        slot: usize,
        peer: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Terminate {
        close_connections: bool,
        reply: oneshot::Sender<()>,
    },
}

/// A client of the committee ledger, bound to one identity.
pub struct Client {
    config: Config,
    identity: Option<Identity>,
    identity_text: String,
    commands: Option<mpsc::Sender<CoreCommand>>,
    events: broadcast::Sender<ClientEvent>,
    energy: Arc<AtomicU64>,
}

impl Client {
    /// Validate the configuration and derive the identity. No sockets or
    /// files are touched until [`Client::launch`].
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;

        let identity = Identity::derive(&config.seed, config.index)?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            identity_text: identity.text().to_string(),
            identity: Some(identity),
            config,
            commands: None,
            events,
            energy: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The external identity string.
    pub fn identity(&self) -> &str {
        &self.identity_text
    }

    /// The current local energy balance.
    pub fn energy(&self) -> u64 {
        self.energy.load(Ordering::Relaxed)
    }

    /// Subscribe to the client's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Open the ledger, replay and verify it, spawn the quorum engine
    /// and the core task, and re-broadcast stale unprocessed transfers.
    pub async fn launch(&mut self) -> Result<(), Error> {
        let identity = self.identity.take().ok_or(Error::AlreadyLaunched)?;

        let stream_key = identity::stream_key(&self.config.seed)?;
        let mut ledger = Ledger::open(
            &self.config.database_path,
            identity.secret().clone(),
            stream_key,
        )?;

        let admin = self.config.admin_public_key;
        let own_public = *identity.public();
        let events = self.events.clone();

        let replayed = ledger.replay(|slot, record| {
            verify_replayed(slot, record, &own_public, &admin, &events)
        });

        let outcome = match replayed {
            Ok(outcome) => outcome,
            Err(LedgerError::EssenceMismatch) => {
                // tampered store: keep running, expose nothing
                warn!("ledger essence signature failed, state stays zeroed");
                let _ = self.events.send(ClientEvent::Error(
                    Error::SignatureVerificationFailed.to_string(),
                ));
                Default::default()
            }
            Err(err) => return Err(err.into()),
        };

        self.energy.store(ledger.energy(), Ordering::Relaxed);

        let (engine, engine_handle) = Engine::new(self.config.engine_config());
        let engine_events = engine_handle.subscribe();
        tokio::spawn(engine.run());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        self.commands = Some(command_tx);

        let mut pending = HashMap::new();
        for (slot, record) in outcome.unprocessed {
            let hash = Hasher::<32>::hash(record.as_bytes());
            pending.insert(
                *hash,
                Pending {
                    slot,
                    record,
                    last_poll: None,
                },
            );
        }

        let core = Core {
            public_bytes: (*identity.public()).into(),
            identity,
            ledger,
            clock: MonotonicClock::new(),
            admin,
            engine: engine_handle,
            engine_events,
            commands: command_rx,
            events: self.events.clone(),
            energy_mirror: self.energy.clone(),
            pending,
            state_status: 0,
        };

        tokio::spawn(core.run());

        Ok(())
    }

    /// Persist, sign and broadcast a transfer of `energy` to
    /// `destination`.
    pub async fn transfer(&self, destination: &str, energy: u64) -> Result<TransferSummary, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send_command(CoreCommand::Transfer {
            destination: destination.to_string(),
            energy,
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| Error::Terminated)?
    }

    /// Verify an exported receipt and integrate it into local state.
    pub async fn import_receipt(&self, encoded: &str) -> Result<(), Error> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send_command(CoreCommand::ImportReceipt {
            encoded: encoded.to_string(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| Error::Terminated)?
    }

    /// Point one connection slot at a different peer. A no-op when the
    /// address is unchanged.
    pub async fn set_peer(&self, slot: usize, peer: &str) -> Result<(), Error> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send_command(CoreCommand::SetPeer {
            slot,
            peer: peer.to_string(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| Error::Terminated)?
    }

    /// Stop the client. The ledger is closed before this returns.
    pub async fn terminate(self, close_connections: bool) {
        let Some(commands) = self.commands else {
            return;
        };

        let (reply_tx, reply_rx) = oneshot::channel();

        let sent = commands
            .send(CoreCommand::Terminate {
                close_connections,
                reply: reply_tx,
            })
            .await;

        if sent.is_ok() {
            let _ = reply_rx.await;
        }
    }

    async fn send_command(&self, command: CoreCommand) -> Result<(), Error> {
        let commands = self.commands.as_ref().ok_or(Error::NotLaunched)?;

        commands.send(command).await.map_err(|_| Error::Terminated)
    }
}

/// Per-record verification during launch replay.
fn verify_replayed(
    slot: u32,
    record: &LedgerRecord,
    own_public: &PublicKey,
    admin: &PublicKey,
    events: &broadcast::Sender<ClientEvent>,
) -> ReplayVerdict {
    let valid = match record {
        // a provisional record must carry our own signature
        LedgerRecord::Unprocessed(transfer) => transfer::verify(transfer, own_public),
        LedgerRecord::Processed(transfer, receipt) => {
            receipt::verify_stored(transfer, receipt, admin).is_ok()
        }
    };

    if valid {
        ReplayVerdict::Keep
    } else {
        warn!(slot, "persisted record failed verification");
        let _ = events.send(ClientEvent::Error(
            Error::SignatureVerificationFailed.to_string(),
        ));
        ReplayVerdict::Skip
    }
}

struct Pending {
    slot: u32,
    record: TransferRecord,
    last_poll: Option<Instant>,
}

struct Core {
    identity: Identity,
    public_bytes: [u8; 32],
    ledger: Ledger,
    clock: MonotonicClock,
    admin: PublicKey,
    engine: EngineHandle,
    engine_events: broadcast::Receiver<engine::Event>,
    commands: mpsc::Receiver<CoreCommand>,
    events: broadcast::Sender<ClientEvent>,
    energy_mirror: Arc<AtomicU64>,
    pending: HashMap<[u8; 32], Pending>,
    state_status: usize,
}

impl Core {
    async fn run(mut self) {
        let _ = self.events.send(ClientEvent::Energy(self.ledger.energy()));

        self.rebroadcast_stale().await;

        let terminate_reply = loop {
            select! {
                event = self.engine_events.recv() => match event {
                    Ok(event) => self.on_engine_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dropped engine events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break None,
                },
                command = self.commands.recv() => match command {
                    Some(CoreCommand::Terminate { close_connections, reply }) => {
                        debug!(close_connections, "terminating");
                        self.engine.send(EngineCommand::Shutdown).await;
                        break Some(reply);
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.engine.send(EngineCommand::Shutdown).await;
                        break None;
                    }
                },
            }
        };

        // close the ledger before acknowledging, so a caller can reopen
        // the store as soon as terminate() returns
        drop(self);

        if let Some(reply) = terminate_reply {
            let _ = reply.send(());
        }
    }

    /// Unprocessed records that predate this launch by a minute or more
    /// go back on the wire once.
    async fn rebroadcast_stale(&mut self) {
        let now = self.clock.now();

        for pending in self.pending.values() {
            if pending.record.timestamp() + STALE_AFTER <= now {
                debug!("re-broadcasting a stale unprocessed transfer");
                self.engine
                    .send(EngineCommand::BroadcastTransfer(
                        protocol::broadcast_transfer(&pending.record),
                    ))
                    .await;
            }
        }
    }

    async fn on_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Transfer {
                destination,
                energy,
                reply,
            } => {
                let result = self.do_transfer(&destination, energy).await;
                let _ = reply.send(result);
            }
            CoreCommand::ImportReceipt { encoded, reply } => {
                let result = self.do_import(&encoded);
                let _ = reply.send(result);
            }
            CoreCommand::SetPeer { slot, peer, reply } => {
                let result = if slot < NUMBER_OF_CONNECTIONS {
                    self.engine.send(EngineCommand::SetPeer { slot, peer }).await;
                    Ok(())
                } else {
                    Err(Error::IllegalArgument("slot"))
                };
                let _ = reply.send(result);
            }
            CoreCommand::Terminate { .. } => unreachable!("handled by the run loop"),
        }
    }

    async fn on_engine_event(&mut self, event: engine::Event) {
        match event {
            engine::Event::SocketOpen { slot, peer } => {
                let _ = self.events.send(ClientEvent::Open { slot, peer });
            }
            engine::Event::SocketClose { slot, peer } => {
                let _ = self.events.send(ClientEvent::Close { slot, peer });
            }
            engine::Event::Info {
                status,
                epoch,
                tick,
                peers,
            } => {
                self.state_status = status;

                let _ = self.events.send(ClientEvent::Info {
                    computer_state: ComputerStateInfo {
                        status,
                        epoch,
                        tick,
                    },
                    peers,
                });

                // confirmation only makes sense once two peers agree on
                // the committee state
                if status >= 2 {
                    self.poll_pending().await;
                }
            }
            engine::Event::InvalidResponses => {
                let _ = self
                    .events
                    .send(ClientEvent::Error(Error::InvalidResponses.to_string()));
            }
            engine::Event::TransferStatus {
                hash,
                counts,
                epoch,
                tick,
            } => {
                let _ = self.events.send(ClientEvent::TransferStatus {
                    hash: Hash::new(hash),
                    unseen: counts.unseen,
                    seen: counts.seen,
                    processed: counts.processed,
                    epoch,
                    tick,
                });
            }
            engine::Event::TransferProcessed { hash, receipt } => {
                self.on_processed(hash, receipt);
            }
        }
    }

    async fn poll_pending(&mut self) {
        let backoff = poll_backoff();

        let due: Vec<[u8; 32]> = self
            .pending
            .iter()
            .filter(|(_, pending)| {
                pending
                    .last_poll
                    .map(|at| at.elapsed() >= backoff)
                    .unwrap_or(true)
            })
            .map(|(hash, _)| *hash)
            .collect();

        for hash in due {
            if let Some(pending) = self.pending.get_mut(&hash) {
                pending.last_poll = Some(Instant::now());
            }
            self.engine.send(EngineCommand::PollStatus { hash }).await;
        }
    }

    async fn do_transfer(
        &mut self,
        destination: &str,
        energy: u64,
    ) -> Result<TransferSummary, Error> {
        if energy < MIN_ENERGY_AMOUNT {
            return Err(Error::IllegalArgument("energy"));
        }

        let destination_key = identity::public_key_of(destination)?;

        if energy > self.ledger.energy() {
            return Err(Error::InsufficientEnergy);
        }

        let timestamp = self.clock.next();
        let (record, hash) = transfer::build(&self.identity, &destination_key, energy, timestamp);

        // the provisional record must be durable before any broadcast
        let slot = self.ledger.append_unprocessed(&record)?;

        self.pending.insert(
            *hash,
            Pending {
                slot,
                record: record.clone(),
                last_poll: None,
            },
        );

        self.engine
            .send(EngineCommand::BroadcastTransfer(
                protocol::broadcast_transfer(&record),
            ))
            .await;

        let summary = TransferSummary::from_record(&record);
        let _ = self.events.send(ClientEvent::Transfer(summary.clone()));

        if self.state_status >= 2 {
            self.poll_pending().await;
        }

        Ok(summary)
    }

    fn do_import(&mut self, encoded: &str) -> Result<(), Error> {
        let imported = receipt::import(encoded, &self.admin)?;

        if self.ledger.contains(&imported.hash) {
            return Err(Error::IllegalArgument("receipt"));
        }

        let previous = self.ledger.energy();
        let amount = imported.record.energy();
        let from_us = imported.record.source() == &self.public_bytes;
        let to_us = imported.record.destination() == &self.public_bytes;

        let energy = match (from_us, to_us) {
            (true, true) | (false, false) => previous,
            (true, false) => previous.saturating_sub(amount),
            (false, true) => previous.saturating_add(amount),
        };

        self.ledger
            .import_processed(&imported.record, &imported.receipt, energy)?;

        self.energy_mirror.store(energy, Ordering::Relaxed);
        let _ = self.events.send(ClientEvent::Energy(energy));
        let _ = self.events.send(ClientEvent::Receipt {
            hash: imported.hash,
            receipt: imported.receipt,
            receipt_base64: encoded.to_string(),
        });

        Ok(())
    }

    fn on_processed(&mut self, hash: [u8; 32], receipt: Vec<u8>) {
        let Some(pending) = self.pending.remove(&hash) else {
            debug!("receipt for a transfer that is not pending");
            return;
        };

        let previous = self.ledger.energy();

        // energy is only burned when this identity is not the destination
        let energy = if pending.record.destination() == &self.public_bytes {
            previous
        } else {
            previous.saturating_sub(pending.record.energy())
        };

        match self
            .ledger
            .finalize_processed(pending.slot, &pending.record, &receipt, energy)
        {
            Ok(_) => {
                self.energy_mirror.store(energy, Ordering::Relaxed);

                let _ = self.events.send(ClientEvent::Energy(energy));
                let _ = self.events.send(ClientEvent::Receipt {
                    hash: Hash::new(hash),
                    receipt: receipt.clone(),
                    receipt_base64: receipt::export(&pending.record, &receipt),
                });
            }
            Err(err) => {
                // in-memory balances were never touched; the next poll
                // retries the rewrite
                warn!(?err, "processed rewrite failed");
                let _ = self
                    .events
                    .send(ClientEvent::Error(Error::from(err).to_string()));
                self.pending.insert(hash, pending);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "vmscmtbcqjbqyqcckegsfdsrcgjpeejobolmimgorsqwgupzhkevreu";

    fn unreachable_peers() -> [String; 3] {
        [
            "127.0.0.1:9".to_string(),
            "127.0.0.1:9".to_string(),
            "127.0.0.1:9".to_string(),
        ]
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut cfg = Config::new(
            SEED,
            0,
            unreachable_peers(),
            PublicKey::from([9; 32]),
            dir.join("ledger"),
        );
        cfg.reconnect_timeout = Duration::from_secs(5);
        cfg
    }

    #[test]
    fn zero_admin_key_is_rejected_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.admin_public_key = PublicKey::from([0; 32]);

        assert!(matches!(
            Client::new(cfg),
            Err(Error::IllegalArgument("admin_public_key"))
        ));
    }

    #[test]
    fn malformed_seed_is_rejected_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.seed = "tooshort".to_string();

        assert!(matches!(
            Client::new(cfg),
            Err(Error::IllegalArgument("seed"))
        ));
    }

    #[tokio::test]
    async fn transfer_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = Client::new(test_config(dir.path())).unwrap();
        client.launch().await.unwrap();

        let destination = Identity::derive(SEED, 1).unwrap().text().to_string();

        // energy below the minimum
        assert!(matches!(
            client.transfer(&destination, 0).await,
            Err(Error::IllegalArgument("energy"))
        ));

        // corrupted destination checksum
        let mut corrupted = destination.clone();
        let last = if corrupted.pop().unwrap() == 'A' { 'B' } else { 'A' };
        corrupted.push(last);

        assert!(matches!(
            client.transfer(&corrupted, 2_000_000).await,
            Err(Error::InvalidChecksum(_))
        ));

        // nothing in the balance yet
        assert!(matches!(
            client.transfer(&destination, 2_000_000).await,
            Err(Error::InsufficientEnergy)
        ));

        client.terminate(true).await;
    }

    #[tokio::test]
    async fn transfer_persists_and_emits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger");

        // seed the balance out of band
        {
            let identity = Identity::derive(SEED, 0).unwrap();
            let key = identity::stream_key(SEED).unwrap();
            let mut ledger = Ledger::open(&path, identity.secret().clone(), key).unwrap();
            ledger.replay(|_, _| ReplayVerdict::Keep).unwrap();
            ledger.set_energy(10_000_000).unwrap();
        }

        let mut client = Client::new(test_config(dir.path())).unwrap();
        client.launch().await.unwrap();
        assert_eq!(client.energy(), 10_000_000);

        let mut events = client.subscribe();
        let destination = Identity::derive(SEED, 1).unwrap().text().to_string();

        let summary = client.transfer(&destination, 2_000_000).await.unwrap();
        assert_eq!(summary.destination, destination);
        assert_eq!(summary.energy, 2_000_000);

        // the balance only moves once a receipt arrives
        assert_eq!(client.energy(), 10_000_000);

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(ClientEvent::Transfer(summary)) = events.recv().await {
                    break summary;
                }
            }
        })
        .await
        .expect("no transfer event");

        assert_eq!(event.hash, summary.hash);

        client.terminate(true).await;

        // the provisional record survived under slot 1
        let identity = Identity::derive(SEED, 0).unwrap();
        let key = identity::stream_key(SEED).unwrap();
        let mut ledger = Ledger::open(&path, identity.secret().clone(), key).unwrap();
        let outcome = ledger.replay(|_, _| ReplayVerdict::Keep).unwrap();

        assert_eq!(ledger.counter(), 1);
        assert_eq!(outcome.unprocessed.len(), 1);
        assert_eq!(outcome.unprocessed[0].1.energy(), 2_000_000);
    }

    #[tokio::test]
    async fn second_launch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = Client::new(test_config(dir.path())).unwrap();
        client.launch().await.unwrap();

        assert!(matches!(client.launch().await, Err(Error::AlreadyLaunched)));

        client.terminate(false).await;
    }
}
