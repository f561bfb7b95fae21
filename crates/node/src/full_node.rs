use std::sync::{Arc, Mutex};
use std::time::Duration;

use cobalt_chain::memory::{MemoryChain, MemoryPool, PoolSettings};
use cobalt_chain::{ChainStore, TransactionPool};
use cobalt_log::{log_debug, log_error, log_info, log_warn};
use cobalt_network::channel::Channel;
use cobalt_network::handshake::Handshake;
use cobalt_network::protocol::PeerProtocol;
use cobalt_primitives::error::ErrorCode;
use cobalt_primitives::{hash256_to_hex, Hash256};
use cobalt_sync::header_table::HeaderTable;
use cobalt_sync::poller::Poller;
use cobalt_sync::session::{Session, SessionSettings};

use crate::config::NodeConfig;

const CLOSE_GRACE_MILLIS: u64 = 200;

/// A full node on the peer-to-peer network: chain store, transaction
/// pool, handshake layer, peer protocol and the session that ties them
/// together. The connection fabric attaches channels via `protocol()`.
pub struct FullNode<C: ChainStore + 'static, P: TransactionPool + 'static> {
    handshake: Arc<Handshake>,
    protocol: Arc<PeerProtocol>,
    chain: Arc<C>,
    tx_pool: Arc<P>,
    session: Arc<Session<C, P>>,
    checkpoint_height: i32,
    checkpoint_hash: Hash256,
    sync_peers: usize,
}

impl FullNode<MemoryChain, MemoryPool> {
    pub fn new(config: &NodeConfig) -> Result<Self, String> {
        let chain = Arc::new(MemoryChain::with_genesis(config.genesis_hash()?));
        let tx_pool = Arc::new(MemoryPool::new(PoolSettings {
            minimum_fee_satoshis: config.minimum_fee_satoshis,
            reject_conflicts: config.reject_conflicts,
        }));
        Self::with_services(chain, tx_pool, config)
    }
}

impl<C: ChainStore + 'static, P: TransactionPool + 'static> FullNode<C, P> {
    pub fn with_services(
        chain: Arc<C>,
        tx_pool: Arc<P>,
        config: &NodeConfig,
    ) -> Result<Self, String> {
        let handshake = Arc::new(Handshake::new(config.relay_transactions));
        let protocol = Arc::new(PeerProtocol::new());
        let poller = Arc::new(Poller::new(
            Arc::clone(&chain),
            Duration::from_secs(config.block_poll_seconds.max(1)),
        ));
        let session = Arc::new(Session::new(
            Arc::clone(&handshake),
            Arc::clone(&protocol),
            Arc::clone(&chain),
            poller,
            Arc::clone(&tx_pool),
            SessionSettings {
                sync_timeout_seconds: config.sync_timeout_seconds,
                minimum_sync_rate: config.minimum_sync_rate,
                refresh_transactions: config.refresh_transactions,
            },
        ));
        Ok(Self {
            handshake,
            protocol,
            chain,
            tx_pool,
            session,
            checkpoint_height: config.checkpoint_height,
            checkpoint_hash: config.checkpoint_hash()?,
            sync_peers: config.resolved_sync_peers(),
        })
    }

    pub fn protocol(&self) -> Arc<PeerProtocol> {
        Arc::clone(&self.protocol)
    }

    pub fn handshake(&self) -> Arc<Handshake> {
        Arc::clone(&self.handshake)
    }

    pub fn chain(&self) -> Arc<C> {
        Arc::clone(&self.chain)
    }

    pub fn pool(&self) -> Arc<P> {
        Arc::clone(&self.tx_pool)
    }

    pub fn start(&self) -> Result<(), ErrorCode> {
        self.chain.start()?;
        self.tx_pool.start()?;
        self.session.start()?;
        // The session is subscribed by now; new channels also feed the
        // transaction pool from here.
        self.spawn_connection_loop();
        log_info!("node started");
        Ok(())
    }

    /// Initial header synchronization, then steady state. Returns the
    /// terminal code of the sync phase.
    pub async fn run(&self) -> ErrorCode {
        let table = match self.build_sync_table() {
            Ok(Some(table)) => table,
            Ok(None) => {
                log_info!("headers already synchronized");
                return ErrorCode::Success;
            }
            Err(code) => {
                log_error!("error preparing header sync: {}", code);
                return code;
            }
        };
        log_info!(
            "header sync using 1 active channel ({} candidate peers)",
            self.sync_peers
        );
        let code = self.session.sync_headers(table).await;
        if code.is_success() {
            log_info!("node out of initial sync");
        } else {
            log_error!("error synchronizing headers: {}", code);
        }
        code
    }

    /// Composite shutdown: every subsystem is asked to stop, the first
    /// failure is reported.
    pub fn stop(&self) -> Result<(), ErrorCode> {
        let mut result = Ok(());
        if let Err(code) = self.session.stop() {
            log_error!("error stopping session: {}", code);
            result = result.and(Err(code));
        }
        if let Err(code) = self.chain.stop() {
            log_error!("error stopping chain store: {}", code);
            result = result.and(Err(code));
        }
        result
    }

    /// Blocking variant used from the constructing task on shutdown.
    pub async fn close(&self) -> Result<(), ErrorCode> {
        let result = self.stop();
        tokio::time::sleep(Duration::from_millis(CLOSE_GRACE_MILLIS)).await;
        result
    }

    fn build_sync_table(&self) -> Result<Option<Arc<Mutex<HeaderTable>>>, ErrorCode> {
        let last_height = self.chain.fetch_last_height()?;
        if last_height >= self.checkpoint_height {
            return Ok(None);
        }
        let anchor = self
            .chain
            .fetch_header_hash(last_height)?
            .ok_or(ErrorCode::OperationFailed)?;
        let capacity = (self.checkpoint_height - last_height) as usize;
        Ok(Some(Arc::new(Mutex::new(HeaderTable::new(
            last_height + 1,
            anchor,
            self.checkpoint_hash,
            capacity,
        )))))
    }

    fn spawn_connection_loop(&self) {
        let protocol = Arc::clone(&self.protocol);
        let tx_pool = Arc::clone(&self.tx_pool);
        tokio::spawn(async move {
            loop {
                let mut subscription = protocol.subscribe_channel();
                match subscription.recv().await {
                    Ok(channel) => spawn_transaction_loop(Arc::clone(&tx_pool), channel),
                    Err(code) => {
                        if code != ErrorCode::ServiceStopped {
                            log_warn!("error starting connection: {}", code);
                        }
                        break;
                    }
                }
            }
        });
    }
}

fn spawn_transaction_loop<P: TransactionPool + 'static>(tx_pool: Arc<P>, channel: Channel) {
    tokio::spawn(async move {
        loop {
            let mut subscription = channel.subscribe_transactions();
            let tx = match subscription.recv().await {
                Ok(tx) => tx,
                Err(code) => {
                    if code != ErrorCode::ChannelStopped {
                        log_error!(
                            "error receiving transaction from [{}]: {}",
                            channel.authority(),
                            code
                        );
                    }
                    break;
                }
            };
            let hash = hash256_to_hex(&tx.hash());
            match tx_pool.store(tx) {
                Ok(accepted) if accepted.unconfirmed_inputs.is_empty() => {
                    log_debug!("accepted transaction into memory pool [{}]", hash);
                }
                Ok(accepted) => {
                    log_debug!(
                        "accepted transaction into memory pool [{}] with unconfirmed inputs ({})",
                        hash,
                        join_indices(&accepted.unconfirmed_inputs)
                    );
                }
                Err(code) => {
                    log_warn!(
                        "error accepting transaction in memory pool [{}]: {}",
                        hash,
                        code
                    );
                }
            }
        }
    });
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
