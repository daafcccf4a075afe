//! In-memory datagram queues for driving OpenSSL without owning a socket.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// The I/O half handed to an `SslStream`.
///
/// Every `write` from OpenSSL becomes one outgoing datagram and every
/// `read` consumes one whole incoming datagram. A read with nothing queued
/// reports `WouldBlock`, which OpenSSL surfaces as `WANT_READ`.
#[derive(Debug, Default)]
pub struct DatagramBuffer {
    incoming: VecDeque<Vec<u8>>,
    outgoing: VecDeque<Vec<u8>>,
}

impl DatagramBuffer {
    /// Queue a received datagram.
    pub fn push_incoming(&mut self, datagram: &[u8]) {
        self.incoming.push_back(datagram.to_vec());
    }

    /// Take the next datagram to send.
    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.outgoing.pop_front()
    }

    /// Check for datagrams waiting to be sent.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }
}

impl Read for DatagramBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(datagram) = self.incoming.pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        // datagram semantics: excess bytes are discarded
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }
}

impl Write for DatagramBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_empty_would_block() {
        let mut buffer = DatagramBuffer::default();
        let err = buffer.read(&mut [0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_datagram_boundaries_kept() {
        let mut buffer = DatagramBuffer::default();
        buffer.push_incoming(b"first");
        buffer.push_incoming(b"second");

        let mut buf = [0u8; 64];
        assert_eq!(buffer.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"first");
        assert_eq!(buffer.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"second");
    }

    #[test]
    fn test_short_read_truncates() {
        let mut buffer = DatagramBuffer::default();
        buffer.push_incoming(b"0123456789");
        let mut buf = [0u8; 4];
        assert_eq!(buffer.read(&mut buf).unwrap(), 4);
        assert!(buffer.read(&mut buf).is_err());
    }

    #[test]
    fn test_each_write_is_one_datagram() {
        let mut buffer = DatagramBuffer::default();
        buffer.write_all(b"one").unwrap();
        buffer.write_all(b"two").unwrap();

        assert!(buffer.has_outgoing());
        assert_eq!(buffer.pop_outgoing().unwrap(), b"one");
        assert_eq!(buffer.pop_outgoing().unwrap(), b"two");
        assert_eq!(buffer.pop_outgoing(), None);
    }
}
