use std::sync::atomic::{AtomicI32, Ordering};

/// Values the version handshake advertises for new connections. The
/// exchange itself belongs to the fabric; the session keeps the height
/// current as the chain grows.
pub struct Handshake {
    start_height: AtomicI32,
    relay_transactions: bool,
}

impl Handshake {
    pub fn new(relay_transactions: bool) -> Self {
        Self {
            start_height: AtomicI32::new(-1),
            relay_transactions,
        }
    }

    pub fn set_start_height(&self, height: i32) {
        self.start_height.store(height, Ordering::SeqCst);
    }

    pub fn start_height(&self) -> i32 {
        self.start_height.load(Ordering::SeqCst)
    }

    pub fn relay_transactions(&self) -> bool {
        self.relay_transactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_updates_are_visible() {
        let handshake = Handshake::new(true);
        assert_eq!(handshake.start_height(), -1);
        handshake.set_start_height(102);
        assert_eq!(handshake.start_height(), 102);
        assert!(handshake.relay_transactions());
    }
}
