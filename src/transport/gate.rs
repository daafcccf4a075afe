//! Admission control for DTLS handshakes.
//!
//! Handshakes are the expensive part of a session. A [`HandshakeGate`]
//! bounds how many run at the same time; sessions sharing a gate queue for
//! a permit, sessions with separate gates do not interact.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::core::{DEFAULT_CONCURRENT_HANDSHAKES, GatewayError, Result};

/// Counting gate for handshakes. Clones share permits.
#[derive(Debug, Clone)]
pub struct HandshakeGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl HandshakeGate {
    /// A gate admitting up to `limit` handshakes at once (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// A gate admitting one handshake at a time.
    pub fn serial() -> Self {
        Self::new(1)
    }

    /// The process-wide gate, used unless a session is given its own.
    pub fn global() -> &'static HandshakeGate {
        static GLOBAL: OnceLock<HandshakeGate> = OnceLock::new();
        GLOBAL.get_or_init(|| HandshakeGate::new(DEFAULT_CONCURRENT_HANDSHAKES))
    }

    /// Wait up to `wait` for a permit.
    pub async fn enter(&self, wait: Duration) -> Result<HandshakePermit> {
        let permit = timeout(wait, Arc::clone(&self.semaphore).acquire_owned())
            .await
            .map_err(|_| GatewayError::Timeout {
                operation: "handshake admission",
                after: wait,
            })?
            // the semaphore is never closed
            .map_err(|_| GatewayError::Cancelled)?;
        Ok(HandshakePermit { _permit: permit })
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Maximum concurrent handshakes.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Permission to run one handshake. Released on drop.
#[derive(Debug)]
pub struct HandshakePermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[tokio::test]
    async fn test_permits_released_on_drop() {
        let gate = HandshakeGate::new(2);
        let a = gate.enter(Duration::from_millis(10)).await.unwrap();
        let _b = gate.enter(Duration::from_millis(10)).await.unwrap();
        assert_eq!(gate.available(), 0);

        drop(a);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_gate_times_out() {
        let gate = HandshakeGate::serial();
        let _held = gate.enter(Duration::from_millis(10)).await.unwrap();

        let err = gate.enter(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_waiter_admitted_after_release() {
        let gate = HandshakeGate::serial();
        let held = gate.enter(Duration::from_millis(10)).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.enter(Duration::from_secs(5)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_limits() {
        assert_eq!(HandshakeGate::new(0).limit(), 1);
        assert_eq!(HandshakeGate::serial().limit(), 1);
        assert_eq!(HandshakeGate::global().limit(), DEFAULT_CONCURRENT_HANDSHAKES);
    }
}
