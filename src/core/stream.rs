//! Console byte stream
//!
//! The serial session talks to the device through this trait only, so the
//! state machine can be driven by a real port or by an in-memory script.

use super::error::RunError;
use bytes::Bytes;
use std::time::Duration;

/// Raw console I/O with bounded reads
pub trait ConsoleStream {
    /// Write all bytes and flush
    fn write(&mut self, data: &[u8]) -> Result<(), RunError>;

    /// Return whatever arrives within `chunk_timeout`; empty when nothing did.
    /// Never blocks past the timeout.
    fn read_available(&mut self, chunk_timeout: Duration) -> Result<Bytes, RunError>;

    /// Drop stale input/output sitting in the driver buffers
    fn flush_buffers(&mut self) -> Result<(), RunError>;
}

impl<S: ConsoleStream + ?Sized> ConsoleStream for Box<S> {
    fn write(&mut self, data: &[u8]) -> Result<(), RunError> {
        (**self).write(data)
    }

    fn read_available(&mut self, chunk_timeout: Duration) -> Result<Bytes, RunError> {
        (**self).read_available(chunk_timeout)
    }

    fn flush_buffers(&mut self) -> Result<(), RunError> {
        (**self).flush_buffers()
    }
}
