//! Host-side orchestration.
//!
//! This module owns the worker lifecycle (spawn, ready, exit), routes outbound commands
//! either to the worker or to the build-string interceptor, and pushes cached data to
//! the display on startup. All state lives in one [`HostContext`] driven from a single
//! event loop.

mod controller;
mod intercept;
mod preload;

use crate::model::HostConfig;
use crate::protocol::{Envelope, HostEnvelope};
use crate::storage::{BuildStore, TalentTreeCache};
use tokio::sync::mpsc::UnboundedSender;
use tracing::error;

pub(crate) use controller::{run_host, UiCommand};

/// Process-scoped state shared by the host's handlers.
pub(crate) struct HostContext {
    pub config: HostConfig,
    pub builds: BuildStore,
    pub trees: TalentTreeCache,
    display_tx: UnboundedSender<String>,
}

impl HostContext {
    pub fn new(config: HostConfig, display_tx: UnboundedSender<String>) -> Self {
        Self {
            builds: BuildStore::new(&config.builds_file),
            trees: TalentTreeCache::new(&config.tree_cache_dir),
            config,
            display_tx,
        }
    }

    /// Forward a validated envelope to the display layer, verbatim.
    pub fn forward(&self, env: Envelope) {
        let _ = self.display_tx.send(env.into_raw());
    }

    /// Emit an envelope produced by the host itself.
    pub fn display(&self, payload: &HostEnvelope) {
        match Envelope::from_serialize(payload) {
            Ok(env) => self.forward(env),
            Err(e) => error!("failed to encode host envelope: {e}"),
        }
    }
}
