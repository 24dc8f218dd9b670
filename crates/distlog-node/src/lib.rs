//! # distlog Node
//!
//! A single member of a distlog cluster.
//!
//! [`Node`] ties together:
//! - the on-disk [`CommitLog`]
//! - the authorizing [`LogService`] facade
//! - the TCP [`LogServer`](distlog_transport::LogServer)
//! - the [`Replicator`] pulling records from peers
//! - the [`Membership`] adapter feeding the replicator
//!
//! ## Example
//!
//! ```rust,ignore
//! use distlog_node::{Node, NodeConfig, PeerConfig};
//!
//! let config = NodeConfig::with_data_dir("./node-1")
//!     .with_name("node-1")
//!     .with_bind_addr("127.0.0.1:8401")
//!     .with_peer(PeerConfig::new("node-2", "127.0.0.1:8402"));
//!
//! let node = Node::new(config).await?;
//! let addr = node.start().await?;
//! println!("serving on {}", addr);
//!
//! node.stop().await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod membership;
pub mod replicator;
pub mod service;

pub use config::{NodeConfig, PeerConfig};
pub use error::{NodeError, NodeResult};
pub use logging::{LogFormat, LoggingConfig};
pub use membership::{Membership, MembershipEvent};
pub use replicator::Replicator;
pub use service::{LogService, service_error};

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use distlog_core::{AclAuthorizer, AllowAll, Authorizer, CallerIdentity};
use distlog_storage::CommitLog;
use distlog_transport::{LogServer, TcpPeerConnector};

/// Capacity of the membership event channel
const MEMBERSHIP_CHANNEL_SIZE: usize = 64;

/// A distlog cluster member
pub struct Node {
    /// Node configuration
    config: NodeConfig,
    /// Local commit log
    log: Arc<CommitLog>,
    /// Authorizing facade over the log
    service: Arc<LogService>,
    /// Replication from peers
    replicator: Arc<Replicator>,
    /// Membership events from providers
    events_tx: mpsc::Sender<MembershipEvent>,
    /// Taken by the membership loop on start
    events_rx: Mutex<Option<mpsc::Receiver<MembershipEvent>>>,
    /// Cancelled on stop
    shutdown: CancellationToken,
    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Address the server is bound to (None until started)
    local_addr: Mutex<Option<SocketAddr>>,
    /// Whether the node has been started
    started: AtomicBool,
}

impl Node {
    /// Create a node
    ///
    /// Opens (or recovers) the commit log under `data_dir` and loads the ACL
    /// policy. Call [`start`](Self::start) to begin serving.
    #[instrument(skip(config), fields(node = %config.node_name, data_dir = %config.data_dir.display()))]
    pub async fn new(config: NodeConfig) -> NodeResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let log = Arc::new(CommitLog::open(config.log_dir(), config.log)?);

        let authorizer: Arc<dyn Authorizer> = match &config.acl_policy {
            Some(path) => {
                let acl = AclAuthorizer::from_file(path)?;
                info!(rules = acl.rules().len(), policy = %path.display(), "Loaded ACL policy");
                Arc::new(acl)
            }
            None => Arc::new(AllowAll),
        };
        let service = Arc::new(LogService::new(Arc::clone(&log), authorizer));

        let identity = CallerIdentity::new(config.node_name.clone());
        let connector = TcpPeerConnector::new(identity.clone())
            .with_connect_timeout(config.connect_timeout());
        let replicator = Arc::new(Replicator::new(
            service.clone(),
            Arc::new(connector),
            identity,
        ));

        let (events_tx, events_rx) = mpsc::channel(MEMBERSHIP_CHANNEL_SIZE);

        info!(next_offset = log.next_offset()?, "Node created");

        Ok(Self {
            config,
            log,
            service,
            replicator,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
            background_tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Start serving and replicating
    ///
    /// Binds the log server, starts the membership loop and joins the
    /// configured static peers. Returns the bound address.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn start(&self) -> NodeResult<SocketAddr> {
        if self.shutdown.is_cancelled() {
            return Err(NodeError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        let server = match LogServer::bind(&self.config.bind_addr, self.service.clone()).await {
            Ok(server) => server,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let addr = server.local_addr()?;
        *self.local_addr.lock() = Some(addr);

        let shutdown = self.shutdown.child_token();
        let server_task = tokio::spawn(async move {
            if let Err(e) = server.serve(shutdown).await {
                error!(error = %e, "Log server failed");
            }
        });

        let membership = Membership::new(self.config.node_name.clone(), self.replicator.clone());
        membership.join_static(&self.config.peers);

        let mut tasks = vec![server_task];
        if let Some(events) = self.events_rx.lock().take() {
            tasks.push(tokio::spawn(
                membership.run(events, self.shutdown.child_token()),
            ));
        }
        self.background_tasks.lock().extend(tasks);

        info!(%addr, peers = self.config.peers.len(), "Node started");
        Ok(addr)
    }

    /// Stop the node
    ///
    /// Stops replication and the server, then closes the log. A stopped node
    /// cannot be started again, whether or not it was ever started.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn stop(&self) -> NodeResult<()> {
        let was_started = self.started.swap(false, Ordering::SeqCst);
        if !was_started && self.shutdown.is_cancelled() {
            return Ok(()); // Already stopped
        }

        self.shutdown.cancel();
        self.replicator.close();

        let tasks: Vec<_> = self.background_tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.log.close()?;
        *self.local_addr.lock() = None;

        info!("Node stopped");
        Ok(())
    }

    /// Check if the node is started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> NodeResult<SocketAddr> {
        self.local_addr.lock().ok_or(NodeError::NotStarted)
    }

    /// Sender for membership events
    ///
    /// Events are processed once the node has started.
    pub fn membership_events(&self) -> mpsc::Sender<MembershipEvent> {
        self.events_tx.clone()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<LogService> {
        &self.service
    }

    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    pub fn log(&self) -> &Arc<CommitLog> {
        &self.log
    }
}
