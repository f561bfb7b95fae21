use crate::block::sha256d;
use crate::Hash256;

/// A raw transaction. The payload is opaque to the sync core; only the
/// hash identity matters for inventory handling and pool lookups.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    raw: Vec<u8>,
}

impl Transaction {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_per_payload() {
        let tx = Transaction::new(vec![1, 2, 3]);
        assert_eq!(tx.hash(), Transaction::new(vec![1, 2, 3]).hash());
        assert_ne!(tx.hash(), Transaction::new(vec![1, 2, 4]).hash());
    }
}
