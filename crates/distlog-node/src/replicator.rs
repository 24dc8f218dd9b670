//! Pull-based replication from peers
//!
//! For every joined peer the [`Replicator`] runs one task that opens a
//! consume stream on the peer from offset 0 and produces each received record
//! into the local log. Tasks stop on `leave`, on `close`, or on the first
//! connect/stream/produce error, after which the peer may be joined again.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use distlog_core::{
    CallerIdentity, LogApi, MembershipHandler, PeerConnector, ServiceError, ServiceResult,
};

struct PeerTask {
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct ReplicatorState {
    peers: HashMap<String, PeerTask>,
    closed: bool,
    next_generation: u64,
}

/// Replicates every joined peer's log into the local log
pub struct Replicator {
    local: Arc<dyn LogApi>,
    connector: Arc<dyn PeerConnector>,
    identity: CallerIdentity,
    state: Arc<Mutex<ReplicatorState>>,
    shutdown: CancellationToken,
}

impl Replicator {
    /// Create a replicator that produces into `local` as `identity`
    pub fn new(
        local: Arc<dyn LogApi>,
        connector: Arc<dyn PeerConnector>,
        identity: CallerIdentity,
    ) -> Self {
        Self {
            local,
            connector,
            identity,
            state: Arc::new(Mutex::new(ReplicatorState::default())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start replicating from `name` at `addr`
    ///
    /// A no-op if the peer is already replicating or the replicator is closed.
    /// Must be called from within a Tokio runtime.
    pub fn join(&self, name: &str, addr: &str) -> ServiceResult<()> {
        let handle = Handle::try_current()
            .map_err(|e| ServiceError::Internal(format!("replicator needs a runtime: {}", e)))?;

        let mut state = self.state.lock();
        if state.closed || state.peers.contains_key(name) {
            return Ok(());
        }

        let token = self.shutdown.child_token();
        let generation = state.next_generation;
        state.next_generation += 1;
        state.peers.insert(
            name.to_string(),
            PeerTask {
                token: token.clone(),
                generation,
            },
        );
        drop(state);

        ReplicationTask {
            name: name.to_string(),
            addr: addr.to_string(),
            local: Arc::clone(&self.local),
            connector: Arc::clone(&self.connector),
            identity: self.identity.clone(),
            state: Arc::clone(&self.state),
            token,
            generation,
        }
        .spawn(&handle);

        info!(peer = name, addr, "Joined peer");
        Ok(())
    }

    /// Stop replicating from `name`; idempotent
    pub fn leave(&self, name: &str) -> ServiceResult<()> {
        if let Some(task) = self.state.lock().peers.remove(name) {
            task.token.cancel();
            info!(peer = name, "Left peer");
        }
        Ok(())
    }

    /// Stop every replication task; later joins are no-ops
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.peers.clear();
        self.shutdown.cancel();
        info!("Replicator closed");
    }

    /// Whether a task is replicating `name`
    pub fn is_replicating(&self, name: &str) -> bool {
        self.state.lock().peers.contains_key(name)
    }

    /// Names of the peers being replicated
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<_> = self.state.lock().peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl MembershipHandler for Replicator {
    fn join(&self, name: &str, addr: &str) -> ServiceResult<()> {
        Replicator::join(self, name, addr)
    }

    fn leave(&self, name: &str) -> ServiceResult<()> {
        Replicator::leave(self, name)
    }
}

struct ReplicationTask {
    name: String,
    addr: String,
    local: Arc<dyn LogApi>,
    connector: Arc<dyn PeerConnector>,
    identity: CallerIdentity,
    state: Arc<Mutex<ReplicatorState>>,
    token: CancellationToken,
    generation: u64,
}

impl ReplicationTask {
    fn spawn(self, handle: &Handle) {
        let span = info_span!("replicate", peer = %self.name, addr = %self.addr);
        handle.spawn(self.run().instrument(span));
    }

    async fn run(self) {
        match self.replicate().await {
            Ok(copied) => debug!(copied, "Replication stopped"),
            Err(e) => error!(error = %e, "Replication failed"),
        }

        let mut state = self.state.lock();
        if state
            .peers
            .get(&self.name)
            .is_some_and(|task| task.generation == self.generation)
        {
            state.peers.remove(&self.name);
        }
    }

    /// Copy records until cancelled; returns how many were produced
    async fn replicate(&self) -> ServiceResult<u64> {
        let mut records = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Ok(0),
            result = self.connector.consume_stream(&self.addr, 0) => result?,
        };
        debug!("Opened peer stream");

        let mut copied = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(copied),
                next = records.next() => next,
            };

            let record = match next {
                Some(record) => record?,
                None => return Err(ServiceError::stream("peer closed the stream")),
            };
            if self.token.is_cancelled() {
                return Ok(copied);
            }

            self.local.produce(&self.identity, record.value).await?;
            copied += 1;
        }
    }
}
