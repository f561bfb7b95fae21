use cobalt_primitives::block::BlockHeader;
use cobalt_primitives::error::ErrorCode;
use cobalt_primitives::transaction::Transaction;
use cobalt_primitives::Hash256;
use tokio::sync::oneshot;

pub mod memory;

/// A change of the active chain tip. Blocks are represented by their
/// headers; bodies never cross this boundary.
#[derive(Clone, Debug)]
pub struct ReorganizeEvent {
    pub fork_point: i32,
    pub new_blocks: Vec<BlockHeader>,
    pub replaced_blocks: Vec<BlockHeader>,
}

/// Single-shot reorganization subscription. Receiving consumes it; the
/// subscriber re-subscribes for the next event. A dropped producer
/// surfaces as `ServiceStopped`.
pub struct ReorganizeSubscription {
    rx: oneshot::Receiver<ReorganizeEvent>,
}

impl ReorganizeSubscription {
    pub fn new(rx: oneshot::Receiver<ReorganizeEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(self) -> Result<ReorganizeEvent, ErrorCode> {
        self.rx.await.map_err(|_| ErrorCode::ServiceStopped)
    }
}

pub trait ChainStore: Send + Sync {
    fn start(&self) -> Result<(), ErrorCode>;
    fn stop(&self) -> Result<(), ErrorCode>;
    fn fetch_last_height(&self) -> Result<i32, ErrorCode>;
    fn fetch_header_hash(&self, height: i32) -> Result<Option<Hash256>, ErrorCode>;
    fn subscribe_reorganize(&self) -> ReorganizeSubscription;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Accepted {
    pub unconfirmed_inputs: Vec<u32>,
}

pub trait TransactionPool: Send + Sync {
    fn start(&self) -> Result<(), ErrorCode>;
    fn exists(&self, hash: &Hash256) -> bool;
    fn store(&self, tx: Transaction) -> Result<Accepted, ErrorCode>;
}
