//! The bounded, blocking page buffer.
//!
//! `Buffer` owns a fixed pool of [`PageDescriptor`] slots and enforces the
//! state machine that serializes concurrent fill/evict activity on each
//! slot:
//!
//! ```text
//! FREE --(admission)--> FILLING --(fill done)--> PRESENT
//! PRESENT --(write fault)--> UPDATING --(write done)--> PRESENT
//! PRESENT --(eviction selects)--> LEAVING --(evict done)--> FREE
//! ```
//!
//! All bookkeeping (`free_list`, `busy_queue`, `present_index`, the waiter
//! counters) lives behind a single coarse mutex, with two condition
//! variables gating the two places a caller can block: waiting for a free
//! slot (`cv_free`) and waiting for the oldest admitted page to finish
//! filling (`cv_oldest_ready`). Page *bytes* live outside this lock, in
//! [`crate::page_store::PageStore`], so I/O on one slot never blocks
//! bookkeeping on another.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::{Condvar, Mutex, MutexGuard};
use static_assertions::assert_impl_all;

use crate::addr::PageAddr;
use crate::config::{BufferConfig, ConfigError};
use crate::descriptor::{fatal_transition, PageDescriptor, PageState, SlotId};
use crate::page_store::{PageReadGuard, PageStore, PageWriteGuard};

struct Inner {
	slots: Vec<PageDescriptor>,
	free_list: Vec<usize>,
	busy_queue: VecDeque<usize>,
	present_index: HashMap<PageAddr, usize>,
	fill_waiting_count: usize,
	last_pd_waiting: Option<usize>,
	shutdown: bool,
}

impl Inner {
	fn new(capacity: usize) -> Self {
		Self {
			slots: std::iter::repeat_with(PageDescriptor::default)
				.take(capacity)
				.collect(),
			free_list: (0..capacity).rev().collect(),
			busy_queue: VecDeque::with_capacity(capacity),
			present_index: HashMap::new(),
			fill_waiting_count: 0,
			last_pd_waiting: None,
			shutdown: false,
		}
	}
}

/// A read-only snapshot of the `Buffer`'s bookkeeping, for diagnostics and
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
	pub capacity: usize,
	pub free: usize,
	pub busy: usize,
	pub present: usize,
	pub fill_waiting: usize,
}

impl fmt::Display for BufferSnapshot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Buffer {{ capacity: {}, free: {}, busy: {}, present: {}, fill_waiting: {} }}",
			self.capacity, self.free, self.busy, self.present, self.fill_waiting
		)
	}
}

pub struct Buffer {
	capacity: usize,
	low_water: usize,
	high_water: usize,
	pages: PageStore,
	inner: Mutex<Inner>,
	cv_free: Condvar,
	cv_oldest_ready: Condvar,
}

assert_impl_all!(Buffer: Send, Sync);

impl Buffer {
	pub fn new(config: &BufferConfig, page_size: usize) -> Result<Self, ConfigError> {
		config.validate()?;
		Ok(Self {
			capacity: config.capacity,
			low_water: config.low_water(),
			high_water: config.high_water(),
			pages: PageStore::new(page_size, config.capacity),
			inner: Mutex::new(Inner::new(config.capacity)),
			cv_free: Condvar::new(),
			cv_oldest_ready: Condvar::new(),
		})
	}

	#[inline]
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	#[inline]
	pub fn page_size(&self) -> usize {
		self.pages.page_size()
	}

	/// Pure read: returns the slot presently representing `page_addr`, if
	/// any. Callers short-circuit duplicate faults on a hit.
	pub fn lookup(&self, page_addr: PageAddr) -> Option<SlotId> {
		let inner = self.inner.lock();
		inner.present_index.get(&page_addr).copied().map(SlotId)
	}

	/// Blocks until a free slot is available, then admits `page_addr` into
	/// it (FREE -> FILLING). Backpressure by design: there is no timeout,
	/// but a shutdown broadcast still releases a blocked caller with `None`
	/// rather than hanging forever.
	pub fn acquire_for_fill(&self, page_addr: PageAddr) -> Option<SlotId> {
		let mut inner = self.inner.lock();
		debug_assert!(
			!inner.present_index.contains_key(&page_addr),
			"acquire_for_fill called for an already-present page"
		);

		inner.fill_waiting_count += 1;
		while inner.free_list.is_empty() {
			if inner.shutdown {
				inner.fill_waiting_count -= 1;
				return None;
			}
			self.cv_free.wait(&mut inner);
		}
		inner.fill_waiting_count -= 1;

		let index = inner.free_list.pop().expect("free list checked nonempty");
		{
			let slot = &mut inner.slots[index];
			slot.page_addr = Some(page_addr);
			slot.dirty = false;
			slot.transition(SlotId(index), PageState::Free, PageState::Filling);
		}
		inner.busy_queue.push_back(index);

		Some(SlotId(index))
	}

	/// FILLING|UPDATING -> PRESENT. Registers the slot under its page address
	/// and, if an evictor is blocked waiting specifically for this slot to
	/// become the ready head, wakes waiters. The wake is conditional: only a
	/// completion of the FIFO head can unblock an evictor, so waking on every
	/// completion would be a thundering herd for no benefit. It broadcasts
	/// rather than notifying a single waiter because more than one evict
	/// worker can be parked on the same head; each re-checks the head on
	/// wake, so only the one that actually dequeues it makes progress and the
	/// rest loop back to waiting on whatever the new head is - a single
	/// `notify_one` would wake exactly one of them and strand the others with
	/// no future signal to rely on, since `last_pd_waiting` only remembers
	/// the most recent registrant.
	pub fn mark_present(&self, slot: SlotId) {
		let mut inner = self.inner.lock();
		let index = slot.index();
		let page_addr = inner.slots[index]
			.page_addr
			.expect("mark_present on a slot with no page address");

		match inner.slots[index].state {
			PageState::Filling => inner.slots[index].transition(slot, PageState::Filling, PageState::Present),
			PageState::Updating => {
				inner.slots[index].transition(slot, PageState::Updating, PageState::Present)
			}
			other => fatal_transition(slot, other, PageState::Present),
		}

		inner.present_index.insert(page_addr, index);

		if inner.last_pd_waiting == Some(index) {
			inner.last_pd_waiting = None;
			self.cv_oldest_ready.notify_all();
		}
	}

	/// PRESENT -> UPDATING: a write fault promotes a read-only resident page.
	pub fn promote_for_write(&self, slot: SlotId) {
		let mut inner = self.inner.lock();
		inner.slots[slot.index()].transition(slot, PageState::Present, PageState::Updating);
	}

	/// Removes and returns the oldest admitted, not-yet-evicted slot,
	/// blocking until it has actually reached PRESENT. This is what makes
	/// eviction strictly FIFO over admission order: an evictor never skips
	/// ahead to a page that merely finished filling sooner. A shutdown
	/// broadcast releases a blocked caller with `None` instead of hanging.
	pub fn acquire_oldest_present(&self) -> Option<SlotId> {
		let mut inner = self.inner.lock();
		loop {
			let &head = inner.busy_queue.front()?;
			if inner.slots[head].state == PageState::Present {
				inner.last_pd_waiting = None;
				inner.busy_queue.pop_front();
				inner.slots[head].transition(SlotId(head), PageState::Present, PageState::Leaving);
				return Some(SlotId(head));
			}
			// Shutdown only cuts off further waiting, never an already-ready
			// head - a caller draining resident pages after shutdown has
			// begun must still be able to do so.
			if inner.shutdown {
				return None;
			}
			inner.last_pd_waiting = Some(head);
			self.cv_oldest_ready.wait(&mut inner);
		}
	}

	/// LEAVING -> FREE. Removes the slot from the present index (if still
	/// present there), returns it to the free list, and - if any fault
	/// handler is blocked on `acquire_for_fill` - signals `cv_free` and
	/// briefly yields the lock so the waiter gets a fair shot at it.
	pub fn release(&self, slot: SlotId) {
		let mut inner = self.inner.lock();
		let index = slot.index();
		inner.slots[index].transition(slot, PageState::Leaving, PageState::Free);

		if let Some(page_addr) = inner.slots[index].page_addr.take() {
			inner.present_index.remove(&page_addr);
		}
		inner.slots[index].dirty = false;
		inner.free_list.push(index);

		if inner.fill_waiting_count > 0 {
			self.cv_free.notify_one();
			MutexGuard::bump(&mut inner);
		}
	}

	/// The special recovery path for a fill that failed before reaching
	/// PRESENT: bypasses PRESENT entirely, removing the slot
	/// from the busy queue and returning it straight to the free list.
	pub fn rollback_fill(&self, slot: SlotId) {
		let mut inner = self.inner.lock();
		let index = slot.index();
		inner.slots[index].transition(slot, PageState::Filling, PageState::Free);
		inner.slots[index].page_addr = None;
		inner.slots[index].dirty = false;

		if let Some(pos) = inner.busy_queue.iter().position(|&i| i == index) {
			inner.busy_queue.remove(pos);
		}
		inner.free_list.push(index);

		if inner.fill_waiting_count > 0 {
			self.cv_free.notify_one();
			MutexGuard::bump(&mut inner);
		}
	}

	pub fn mark_dirty(&self, slot: SlotId) {
		self.inner.lock().slots[slot.index()].dirty = true;
	}

	pub fn is_dirty(&self, slot: SlotId) -> bool {
		self.inner.lock().slots[slot.index()].dirty
	}

	/// The page address `slot` currently represents, if any. Stays populated
	/// through LEAVING so an evict worker can still address the write-back
	/// after `acquire_oldest_present` hands the slot over.
	pub fn page_addr(&self, slot: SlotId) -> Option<PageAddr> {
		self.inner.lock().slots[slot.index()].page_addr
	}

	pub fn high_water_reached(&self) -> bool {
		self.inner.lock().busy_queue.len() >= self.high_water
	}

	pub fn low_water_reached(&self) -> bool {
		self.inner.lock().busy_queue.len() <= self.low_water
	}

	#[inline]
	pub fn low_water(&self) -> usize {
		self.low_water
	}

	#[inline]
	pub fn high_water(&self) -> usize {
		self.high_water
	}

	/// Sets the shutdown flag and broadcasts both `cv_free` and
	/// `cv_oldest_ready` so every caller parked in `acquire_for_fill` or
	/// `acquire_oldest_present` wakes, observes the flag, and returns `None`
	/// instead of waiting forever. Per spec §5, shutdown only unblocks
	/// waiters; it does not itself evict or flush resident pages - callers
	/// must already have quiesced the mapped region before relying on
	/// `Drop`'s empty-`present_index` assertion.
	pub fn shutdown(&self) {
		let mut inner = self.inner.lock();
		inner.shutdown = true;
		self.cv_free.notify_all();
		self.cv_oldest_ready.notify_all();
	}

	pub fn read_page(&self, slot: SlotId) -> PageReadGuard<'_> {
		self.pages.read(slot.index())
	}

	pub fn write_page(&self, slot: SlotId) -> PageWriteGuard<'_> {
		self.pages.write(slot.index())
	}

	pub fn snapshot(&self) -> BufferSnapshot {
		let inner = self.inner.lock();
		BufferSnapshot {
			capacity: self.capacity,
			free: inner.free_list.len(),
			busy: inner.busy_queue.len(),
			present: inner.present_index.len(),
			fill_waiting: inner.fill_waiting_count,
		}
	}
}

impl fmt::Display for Buffer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.snapshot())
	}
}

impl Drop for Buffer {
	fn drop(&mut self) {
		let inner = self.inner.get_mut();
		assert!(
			inner.present_index.is_empty(),
			"Buffer dropped with {} page(s) still resident; the caller must flush \
			 and evict everything before destroying the buffer",
			inner.present_index.len()
		);
	}
}
