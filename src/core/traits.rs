//! Core traits for the gateway bootstrap.
//!
//! These traits define the seams between the CoAP exchange engine and the
//! secure transport underneath it.

use std::future::Future;

use super::error::Result;

/// A bidirectional channel of protected records.
///
/// Each `send` produces exactly one record on the wire and each `recv`
/// yields exactly one decrypted record, so CoAP messages map one-to-one onto
/// records. The DTLS session in [`crate::transport::SecureChannel`] is the
/// production implementation.
///
/// # Requirements
///
/// - `recv` MUST be cancel-safe: dropping the future before it completes
///   loses no record that would otherwise have been returned.
/// - `close` MUST be idempotent.
pub trait RecordChannel: Send {
    /// Send one record.
    fn send(&mut self, record: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next record.
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Close the channel. Best effort; never fails.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
