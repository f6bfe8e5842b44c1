use std::error::Error as StdError;

/// How a backing-store error should be handled by the worker that hit it
/// Transient errors are retried by the worker; permanent ones are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	Transient,
	Permanent,
}

/// The contract a pluggable backing store must satisfy.
///
/// Reads and writes are blocking and happen outside the `Buffer`'s mutex.
/// `classify` lets the store distinguish e.g. a retryable `EINTR`/`EAGAIN`
/// from a disk-full or corrupted-file condition without the `Buffer` or its
/// workers needing to know anything about the underlying medium.
pub trait BackingStore: Send + Sync {
	type Error: StdError + Send + Sync + 'static;

	fn read_page(&self, addr: crate::addr::PageAddr, dst: &mut [u8]) -> Result<(), Self::Error>;

	fn write_page(&self, addr: crate::addr::PageAddr, src: &[u8]) -> Result<(), Self::Error>;

	fn classify(&self, error: &Self::Error) -> ErrorClass;
}
