use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cobalt_chain::{ChainStore, TransactionPool};
use cobalt_log::{log_debug, log_error, log_info, log_warn};
use cobalt_network::channel::Channel;
use cobalt_network::handshake::Handshake;
use cobalt_network::message::{GetData, Inventory, InventoryKind, InventoryVector, Message};
use cobalt_network::protocol::PeerProtocol;
use cobalt_primitives::error::ErrorCode;
use cobalt_primitives::Hash256;

use crate::header_sync::HeaderSync;
use crate::header_table::HeaderTable;
use crate::poller::Poller;

const TX_INVENTORY_QUEUE: usize = 4096;
const SYNC_RETRY_SLEEP_SECS: u64 = 2;

#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    pub sync_timeout_seconds: u64,
    pub minimum_sync_rate: u32,
    pub refresh_transactions: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sync_timeout_seconds: 5,
            minimum_sync_rate: 10,
            refresh_transactions: true,
        }
    }
}

/// Process-wide coordinator. Wires each attached channel's inventory and
/// getblocks streams, funnels transaction announcements through a single
/// strand, relays chain reorganizations to the handshake layer and the
/// peers, and drives initial header synchronization.
pub struct Session<C: ChainStore + 'static, P: TransactionPool + 'static> {
    handshake: Arc<Handshake>,
    protocol: Arc<PeerProtocol>,
    chain: Arc<C>,
    poller: Arc<Poller<C>>,
    tx_pool: Arc<P>,
    settings: SessionSettings,
    strand: tokio::sync::mpsc::Sender<(Hash256, Channel)>,
    strand_rx: Mutex<Option<tokio::sync::mpsc::Receiver<(Hash256, Channel)>>>,
}

impl<C: ChainStore + 'static, P: TransactionPool + 'static> Session<C, P> {
    pub fn new(
        handshake: Arc<Handshake>,
        protocol: Arc<PeerProtocol>,
        chain: Arc<C>,
        poller: Arc<Poller<C>>,
        tx_pool: Arc<P>,
        settings: SessionSettings,
    ) -> Self {
        let (strand, strand_rx) = tokio::sync::mpsc::channel(TX_INVENTORY_QUEUE);
        Self {
            handshake,
            protocol,
            chain,
            poller,
            tx_pool,
            settings,
            strand,
            strand_rx: Mutex::new(Some(strand_rx)),
        }
    }

    /// Starts the peer protocol and arms the long-lived subscription
    /// loops. Returns before any synchronization happens.
    pub fn start(&self) -> Result<(), ErrorCode> {
        self.protocol.start()?;
        self.spawn_strand();
        self.spawn_channel_loop();
        let height = self.chain.fetch_last_height()?;
        self.handshake.set_start_height(height);
        self.spawn_reorganize_loop();
        Ok(())
    }

    /// Stops the peer protocol. The chain store is owned by the node and
    /// is not touched here.
    pub fn stop(&self) -> Result<(), ErrorCode> {
        self.protocol.stop()
    }

    /// The mempool serialization point: inventory receipt runs on
    /// whatever task delivered it, existence checks and getdata requests
    /// run here, one at a time.
    fn spawn_strand(&self) {
        let taken = self.strand_rx.lock().ok().and_then(|mut slot| slot.take());
        let Some(mut strand_rx) = taken else {
            return;
        };
        let tx_pool = Arc::clone(&self.tx_pool);
        tokio::spawn(async move {
            while let Some((hash, channel)) = strand_rx.recv().await {
                if tx_pool.exists(&hash) {
                    continue;
                }
                let request = GetData {
                    inventories: vec![InventoryVector {
                        kind: InventoryKind::Transaction,
                        hash,
                    }],
                };
                if let Err(code) = channel.send(Message::GetData(request)).await {
                    log_error!(
                        "failure in get tx from [{}]: {}",
                        channel.authority(),
                        code
                    );
                }
            }
        });
    }

    fn spawn_channel_loop(&self) {
        let protocol = Arc::clone(&self.protocol);
        let poller = Arc::clone(&self.poller);
        let strand = self.strand.clone();
        let refresh_transactions = self.settings.refresh_transactions;
        tokio::spawn(async move {
            loop {
                let mut subscription = protocol.subscribe_channel();
                match subscription.recv().await {
                    Ok(channel) => {
                        new_channel(poller.as_ref(), strand.clone(), refresh_transactions, channel)
                            .await;
                    }
                    Err(code) => {
                        if code != ErrorCode::ServiceStopped {
                            log_error!("failure to establish channel: {}", code);
                        }
                        break;
                    }
                }
            }
        });
    }

    fn spawn_reorganize_loop(&self) {
        let chain = Arc::clone(&self.chain);
        let handshake = Arc::clone(&self.handshake);
        let protocol = Arc::clone(&self.protocol);
        tokio::spawn(async move {
            loop {
                let subscription = chain.subscribe_reorganize();
                let event = match subscription.recv().await {
                    Ok(event) => event,
                    // The store shut down; the subscription chain ends here.
                    Err(_) => break,
                };

                let height = event
                    .fork_point
                    .saturating_add(event.new_blocks.len() as i32);
                handshake.set_start_height(height);

                if event.new_blocks.is_empty() {
                    continue;
                }
                let inventory =
                    Inventory::blocks(event.new_blocks.iter().map(|block| block.hash()));
                let count = protocol.broadcast(Message::Inventory(inventory)).await;
                log_debug!(
                    "announced {} new blocks to {} peers",
                    event.new_blocks.len(),
                    count
                );
            }
        });
    }

    /// Drives initial sync: one header-sync attempt at a time, replacing
    /// the peer on failure, until the table reaches its stop hash. Peers
    /// that ran dry are not picked again.
    pub async fn sync_headers(&self, table: Arc<Mutex<HeaderTable>>) -> ErrorCode {
        let interval = Duration::from_secs(self.settings.sync_timeout_seconds.max(1));
        let mut exhausted: HashSet<String> = HashSet::new();
        loop {
            let done = table
                .lock()
                .map(|table| table.complete())
                .unwrap_or(false);
            if done {
                return ErrorCode::Success;
            }

            let channel = match self.protocol.sync_candidate(&exhausted) {
                Err(code) => return code,
                Ok(Some(channel)) => channel,
                Ok(None) => {
                    tokio::time::sleep(Duration::from_secs(SYNC_RETRY_SLEEP_SECS)).await;
                    continue;
                }
            };

            log_info!("synchronizing headers from [{}]", channel.authority());
            let sync = HeaderSync::new(
                channel.clone(),
                Arc::clone(&table),
                self.settings.minimum_sync_rate,
                interval,
            );
            let code = sync.start().wait().await;
            match code {
                ErrorCode::Success => {
                    log_info!("header synchronization complete");
                    return ErrorCode::Success;
                }
                ErrorCode::ServiceStopped => return ErrorCode::ServiceStopped,
                ErrorCode::OperationFailed => {
                    exhausted.insert(channel.authority().to_string());
                    log_debug!("header sync peer [{}] exhausted", channel.authority());
                }
                code => {
                    log_warn!(
                        "header sync failed from [{}]: {}",
                        channel.authority(),
                        code
                    );
                }
            }
        }
    }
}

async fn new_channel<C: ChainStore + 'static>(
    poller: &Poller<C>,
    strand: tokio::sync::mpsc::Sender<(Hash256, Channel)>,
    refresh_transactions: bool,
    channel: Channel,
) {
    log_info!("connected channel [{}]", channel.authority());
    spawn_inventory_loop(strand, channel.clone());
    spawn_get_blocks_loop(channel.clone());
    if refresh_transactions {
        if let Err(code) = channel.send(Message::MemPool).await {
            log_debug!(
                "failure requesting mempool from [{}]: {}",
                channel.authority(),
                code
            );
        }
    }
    poller.query(&channel).await;
    poller.monitor(&channel);
}

fn spawn_inventory_loop(strand: tokio::sync::mpsc::Sender<(Hash256, Channel)>, channel: Channel) {
    tokio::spawn(async move {
        loop {
            let mut subscription = channel.subscribe_inventory();
            let message = match subscription.recv().await {
                Ok(message) => message,
                Err(code) => {
                    if code == ErrorCode::ChannelStopped {
                        log_debug!("inventory stream closed on [{}]", channel.authority());
                    } else {
                        log_error!(
                            "failure in get inventory from [{}]: {}",
                            channel.authority(),
                            code
                        );
                    }
                    break;
                }
            };
            for vector in message.inventories {
                match vector.kind {
                    InventoryKind::Transaction => {
                        if strand.send((vector.hash, channel.clone())).await.is_err() {
                            return;
                        }
                    }
                    // Block announcements are the poller's business.
                    InventoryKind::Block => {}
                    _ => {
                        log_warn!(
                            "ignoring unsupported inventory type from [{}]",
                            channel.authority()
                        );
                    }
                }
            }
        }
    });
}

fn spawn_get_blocks_loop(channel: Channel) {
    tokio::spawn(async move {
        loop {
            let mut subscription = channel.subscribe_get_blocks();
            match subscription.recv().await {
                Ok(_) => {
                    // TODO: answer with an inv of up to 500 block hashes
                    // walked forward from the requested fork point.
                    log_debug!("ignoring get blocks from [{}]", channel.authority());
                }
                Err(code) => {
                    if code != ErrorCode::ChannelStopped {
                        log_error!(
                            "failure in get blocks from [{}]: {}",
                            channel.authority(),
                            code
                        );
                    }
                    break;
                }
            }
        }
    });
}
