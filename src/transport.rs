use std::time::Duration;

/// Trait for reader communication backends.
/// Implement this trait for different transports (UART, serial port, etc.)
///
/// The driver never assumes a `receive` call returns exactly one frame: the
/// buffer may be empty, partial, or hold a stale frame ahead of the answer.
pub trait RainTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Open the underlying channel
    fn open(&mut self) -> Result<(), Self::Error>;

    /// Write a complete request to the transport
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Return the first bytes that arrive within `timeout`, or an empty buffer
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, Self::Error>;

    /// Close the underlying channel
    fn close(&mut self) -> Result<(), Self::Error>;
}
