//! The fault-handler shim: a thin adapter translating a page
//! fault into `Buffer` operations. The actual userfault/signal trap
//! mechanism that invokes this is an external collaborator out of this
//! crate's scope - this only specifies the call pattern such a trap handler
//! would follow.

use std::sync::Arc;

use crate::addr::PageAddr;
use crate::buffer::Buffer;
use crate::descriptor::SlotId;
use crate::error::BackingStore;
use crate::workers::{FillError, WorkerPools};

#[derive(Debug, thiserror::Error)]
pub enum FaultError<E: std::error::Error + Send + Sync + 'static> {
	#[error(transparent)]
	Fill(#[from] FillError<E>),

	#[error("the fill worker pool was shut down before the fault could be serviced")]
	WorkerPoolGone,

	#[error("the buffer was shut down before a free slot could be admitted")]
	BufferShutDown,
}

pub struct FaultHandler<S: BackingStore + 'static> {
	buffer: Arc<Buffer>,
	pools: Arc<WorkerPools<S>>,
}

impl<S: BackingStore + 'static> FaultHandler<S> {
	pub fn new(buffer: Arc<Buffer>, pools: Arc<WorkerPools<S>>) -> Self {
		Self { buffer, pools }
	}

	/// Services a fault for `page_addr`: on a hit, returns the already
	/// resident slot immediately; on a miss, admits a new slot (blocking if
	/// the buffer is full), hands the fill off to a worker, and blocks this
	/// thread until the fill completes.
	///
	/// `is_write` is only used to decide whether a present page must first
	/// be promoted PRESENT -> UPDATING before the caller is handed back
	/// write access; it plays no part in a miss, since a freshly filled page
	/// always starts out clean and PRESENT.
	pub fn handle_fault(&self, page_addr: PageAddr, is_write: bool) -> Result<SlotId, FaultError<S::Error>> {
		if let Some(slot) = self.buffer.lookup(page_addr) {
			if is_write {
				self.buffer.promote_for_write(slot);
				self.buffer.mark_dirty(slot);
				self.buffer.mark_present(slot);
			}
			return Ok(slot);
		}

		let slot = self
			.buffer
			.acquire_for_fill(page_addr)
			.ok_or(FaultError::BufferShutDown)?;
		let receiver = self.pools.submit_fill(slot, page_addr);
		let outcome = receiver.recv().map_err(|_| FaultError::WorkerPoolGone)?;
		let slot = outcome?;

		if is_write {
			self.buffer.promote_for_write(slot);
			self.buffer.mark_dirty(slot);
			self.buffer.mark_present(slot);
		}

		Ok(slot)
	}
}
