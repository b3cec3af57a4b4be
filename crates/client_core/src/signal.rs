use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RefreshToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshOrigin {
    Submission,
    Deletion,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSignal {
    pub token: RefreshToken,
    pub origin: RefreshOrigin,
}

#[derive(Debug)]
struct BusInner {
    tx: broadcast::Sender<RefreshSignal>,
    token: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct RefreshBus {
    inner: Arc<BusInner>,
}

impl RefreshBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                tx,
                token: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> RefreshToken {
        RefreshToken(self.inner.token.load(Ordering::SeqCst))
    }

    pub fn publish(&self, origin: RefreshOrigin) -> RefreshSignal {
        let token = RefreshToken(self.inner.token.fetch_add(1, Ordering::SeqCst) + 1);
        let signal = RefreshSignal { token, origin };
        let receivers = self.inner.tx.send(signal).unwrap_or(0);
        debug!(token = token.0, ?origin, receivers, "refresh signal published");
        signal
    }

    pub fn subscribe(&self) -> RefreshSubscription {
        RefreshSubscription {
            rx: self.inner.tx.subscribe(),
            bus: Arc::downgrade(&self.inner),
            last_seen: self.current(),
        }
    }
}

impl Default for RefreshBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RefreshSubscription {
    rx: broadcast::Receiver<RefreshSignal>,
    bus: std::sync::Weak<BusInner>,
    last_seen: RefreshToken,
}

impl RefreshSubscription {
    pub fn last_seen(&self) -> RefreshToken {
        self.last_seen
    }

    /// Waits for a token newer than the last one seen.
    ///
    /// A lagged receiver gets a single signal for the newest token instead
    /// of one per missed increment. Returns `None` once the bus is gone.
    pub async fn changed(&mut self) -> Option<RefreshSignal> {
        loop {
            match self.rx.recv().await {
                Ok(signal) if signal.token > self.last_seen => {
                    self.last_seen = signal.token;
                    return Some(signal);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    let bus = self.bus.upgrade()?;
                    let token = RefreshToken(bus.token.load(Ordering::SeqCst));
                    debug!(skipped, token = token.0, "refresh subscription lagged");
                    if token > self.last_seen {
                        self.last_seen = token;
                        // Origin of the coalesced batch is unknown; treat it as a
                        // full reset so every consumer re-pulls.
                        return Some(RefreshSignal {
                            token,
                            origin: RefreshOrigin::Reset,
                        });
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/signal_tests.rs"]
mod tests;
