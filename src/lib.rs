//! A user-space paging buffer: a bounded, blocking page cache that services
//! fill/evict traffic between fault handlers and background workers against
//! a pluggable backing store.
//!
//! The buffer itself never touches the kernel's `mmap`; it is the thing a
//! userfault (or similar trap) handler consults once it has already
//! intercepted an access to an unmapped page. See [`buffer::Buffer`] for the
//! core state machine and [`fault::FaultHandler`] for the call pattern a
//! trap handler follows.

mod addr;
mod backing_store;
mod buffer;
mod config;
mod consts;
mod descriptor;
mod error;
mod fault;
mod page_store;
mod units;
mod work_queue;
mod workers;

pub use addr::PageAddr;
pub use backing_store::{FileBackingStore, FileStoreError};
pub use buffer::{Buffer, BufferSnapshot};
pub use config::{BufferConfig, ConfigError, WorkerConfig};
pub use consts::{validate_page_size, PageSizeBoundsError, DEFAULT_PAGE_SIZE, PAGE_SIZE_RANGE};
pub use descriptor::{PageState, SlotId};
pub use error::{BackingStore, ErrorClass};
pub use fault::{FaultError, FaultHandler};
pub use page_store::{PageReadGuard, PageWriteGuard};
pub use workers::{FillError, FillOutcome, WorkerPools};
