//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use quorus_codec::NUMBER_OF_CONNECTIONS;
use quorus_crypto::key::ed25519::PublicKey;
use quorus_network::engine;

use crate::Error;

#[derive(Debug, Clone)]
pub struct Config {
    /// 55 lowercase latin letters; derives the identity key pair.
    pub seed: String,

    /// Identity sub-derivation index.
    pub index: u32,

    /// Exactly three initial peer addresses.
    pub peers: [String; NUMBER_OF_CONNECTIONS],

    /// Verifies computer-state records. All-zero keys are rejected.
    pub admin_public_key: PublicKey,

    pub connection_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub computer_state_sync_timeout: Duration,
    pub computer_state_sync_delay: Duration,

    /// On-disk location of this identity's ledger.
    pub database_path: PathBuf,
}

impl Config {
    pub fn new(
        seed: impl Into<String>,
        index: u32,
        peers: [String; NUMBER_OF_CONNECTIONS],
        admin_public_key: PublicKey,
        database_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            seed: seed.into(),
            index,
            peers,
            admin_public_key,
            connection_timeout: engine::DEFAULT_CONNECTION_TIMEOUT,
            reconnect_timeout: engine::DEFAULT_RECONNECT_TIMEOUT,
            computer_state_sync_timeout: engine::DEFAULT_SYNC_TIMEOUT,
            computer_state_sync_delay: engine::DEFAULT_SYNC_DELAY,
            database_path: database_path.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.admin_public_key.is_zero() {
            return Err(Error::IllegalArgument("admin_public_key"));
        }

        if self.peers.iter().any(|peer| peer.is_empty()) {
            return Err(Error::IllegalArgument("peers"));
        }

        Ok(())
    }

    pub(crate) fn engine_config(&self) -> engine::EngineConfig {
        let mut cfg = engine::EngineConfig::new(self.peers.clone(), self.admin_public_key);
        cfg.connection_timeout = self.connection_timeout;
        cfg.reconnect_timeout = self.reconnect_timeout;
        cfg.computer_state_sync_timeout = self.computer_state_sync_timeout;
        cfg.computer_state_sync_delay = self.computer_state_sync_delay;
        cfg
    }
}
