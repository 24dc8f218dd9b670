//! Membership adapter
//!
//! Bridges a membership provider to a [`MembershipHandler`]. Providers push
//! [`MembershipEvent`]s into a channel; [`Membership::run`] consumes them,
//! skips events about the local node and forwards the rest. Handler errors
//! are logged, never propagated back to the provider.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use distlog_core::MembershipHandler;

use crate::config::PeerConfig;

/// Membership change reported by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined { name: String, addr: String },
    Left { name: String },
}

impl MembershipEvent {
    /// Name of the peer the event is about
    pub fn name(&self) -> &str {
        match self {
            MembershipEvent::Joined { name, .. } | MembershipEvent::Left { name } => name,
        }
    }
}

/// Forwards membership events for everyone but the local node
pub struct Membership {
    local_name: String,
    handler: Arc<dyn MembershipHandler>,
}

impl Membership {
    pub fn new(local_name: impl Into<String>, handler: Arc<dyn MembershipHandler>) -> Self {
        Self {
            local_name: local_name.into(),
            handler,
        }
    }

    /// Apply a single event
    ///
    /// Returns false if the event was about the local node and ignored.
    pub fn handle(&self, event: &MembershipEvent) -> bool {
        if event.name() == self.local_name {
            debug!(peer = event.name(), "Ignoring membership event for local node");
            return false;
        }

        let result = match event {
            MembershipEvent::Joined { name, addr } => self.handler.join(name, addr),
            MembershipEvent::Left { name } => self.handler.leave(name),
        };
        if let Err(e) = result {
            error!(peer = event.name(), error = %e, "Membership handler failed");
        }
        true
    }

    /// Join every configured peer
    pub fn join_static(&self, peers: &[PeerConfig]) {
        for peer in peers {
            self.handle(&MembershipEvent::Joined {
                name: peer.name.clone(),
                addr: peer.addr.clone(),
            });
        }
    }

    /// Consume events until the channel closes or `shutdown` fires
    pub async fn run(
        self,
        mut events: mpsc::Receiver<MembershipEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle(&event);
                    }
                    None => break,
                },
            }
        }
        info!("Membership loop stopped");
    }
}
