use cobalt_primitives::block::BlockHeader;
use cobalt_primitives::transaction::Transaction;
use cobalt_primitives::Hash256;

/// A peer answering `getheaders` sends at most this many headers; a
/// shorter batch means it has nothing more to give.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InventoryKind {
    Transaction,
    Block,
    FilteredBlock,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InventoryVector {
    pub kind: InventoryKind,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct GetHeaders {
    pub locator: Vec<Hash256>,
    pub stop: Hash256,
}

#[derive(Clone, Debug)]
pub struct Headers {
    pub headers: Vec<BlockHeader>,
}

#[derive(Clone, Debug)]
pub struct Inventory {
    pub inventories: Vec<InventoryVector>,
}

impl Inventory {
    /// One `block` vector per hash, preserving chain order.
    pub fn blocks(hashes: impl IntoIterator<Item = Hash256>) -> Self {
        Self {
            inventories: hashes
                .into_iter()
                .map(|hash| InventoryVector {
                    kind: InventoryKind::Block,
                    hash,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GetData {
    pub inventories: Vec<InventoryVector>,
}

#[derive(Clone, Debug)]
pub struct GetBlocks {
    pub locator: Vec<Hash256>,
    pub stop: Hash256,
}

/// Typed protocol messages. Byte-level framing and codec live with the
/// network fabric, outside this crate.
#[derive(Clone, Debug)]
pub enum Message {
    GetHeaders(GetHeaders),
    Headers(Headers),
    Inventory(Inventory),
    GetData(GetData),
    GetBlocks(GetBlocks),
    Transaction(Transaction),
    MemPool,
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::GetHeaders(_) => "getheaders",
            Message::Headers(_) => "headers",
            Message::Inventory(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks(_) => "getblocks",
            Message::Transaction(_) => "tx",
            Message::MemPool => "mempool",
        }
    }
}
