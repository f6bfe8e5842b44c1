//! Fill and evict worker pools, and the eviction manager that drives them.
//!
//! Small fixed-size thread pools are used in preference to a dynamically
//! sized executor. Work items cross from the
//! fault-handling side to a worker via a [`crate::work_queue::WorkQueue`];
//! results cross back via a [`std::sync::mpsc`] channel, since a fault
//! handler is a single synchronous caller waiting on exactly one outcome.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, warn};
use static_assertions::assert_impl_all;

use crate::addr::PageAddr;
use crate::buffer::Buffer;
use crate::config::WorkerConfig;
use crate::descriptor::SlotId;
use crate::error::{BackingStore, ErrorClass};

/// Outcome of a fill request, sent back to whatever fault handler issued it.
pub type FillOutcome<E> = Result<SlotId, FillError<E>>;

#[derive(Debug, thiserror::Error)]
pub enum FillError<E: std::error::Error + Send + Sync + 'static> {
	#[error("backing store read failed: {0}")]
	Read(#[source] E),
}

struct FillRequest<E> {
	slot: SlotId,
	page_addr: PageAddr,
	reply: mpsc::Sender<FillOutcome<E>>,
}

/// How often the eviction manager polls `high_water_reached`/
/// `low_water_reached`. The Buffer itself exposes only the two booleans
/// it does not push a notification when the watermark is
/// crossed, so a manager thread has to check periodically.
const MANAGER_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct WorkerPools<S: BackingStore + 'static> {
	buffer: Arc<Buffer>,
	backing: Arc<S>,
	fill_queue: Arc<crate::work_queue::WorkQueue<FillRequest<S::Error>>>,
	evict_queue: Arc<crate::work_queue::WorkQueue<()>>,
	running: Arc<AtomicBool>,
	outstanding_evictions: Arc<AtomicUsize>,
	threads: Vec<JoinHandle<()>>,
}

assert_impl_all!(WorkerPools<crate::backing_store::FileBackingStore>: Send, Sync);

impl<S: BackingStore + 'static> WorkerPools<S> {
	pub fn spawn(buffer: Arc<Buffer>, backing: Arc<S>, config: WorkerConfig) -> Self {
		let fill_queue = Arc::new(crate::work_queue::WorkQueue::new());
		let evict_queue = Arc::new(crate::work_queue::WorkQueue::new());
		let running = Arc::new(AtomicBool::new(true));
		let outstanding_evictions = Arc::new(AtomicUsize::new(0));

		let mut threads = Vec::with_capacity(config.fill_threads + config.evict_threads + 1);

		for i in 0..config.fill_threads {
			let buffer = Arc::clone(&buffer);
			let backing = Arc::clone(&backing);
			let fill_queue = Arc::clone(&fill_queue);
			threads.push(
				thread::Builder::new()
					.name(format!("fill-worker-{i}"))
					.spawn(move || fill_worker_loop(&buffer, &backing, &fill_queue))
					.expect("failed to spawn fill worker thread"),
			);
		}

		for i in 0..config.evict_threads {
			let buffer = Arc::clone(&buffer);
			let backing = Arc::clone(&backing);
			let evict_queue = Arc::clone(&evict_queue);
			let outstanding_evictions = Arc::clone(&outstanding_evictions);
			threads.push(
				thread::Builder::new()
					.name(format!("evict-worker-{i}"))
					.spawn(move || {
						evict_worker_loop(
							&buffer,
							&backing,
							&evict_queue,
							&outstanding_evictions,
							config.evict_write_retries,
						)
					})
					.expect("failed to spawn evict worker thread"),
			);
		}

		{
			let buffer = Arc::clone(&buffer);
			let evict_queue = Arc::clone(&evict_queue);
			let running = Arc::clone(&running);
			let outstanding_evictions = Arc::clone(&outstanding_evictions);
			threads.push(
				thread::Builder::new()
					.name("eviction-manager".to_string())
					.spawn(move || eviction_manager_loop(&buffer, &evict_queue, &outstanding_evictions, &running))
					.expect("failed to spawn eviction manager thread"),
			);
		}

		Self {
			buffer,
			backing,
			fill_queue,
			evict_queue,
			running,
			outstanding_evictions,
			threads,
		}
	}

	#[inline]
	pub fn buffer(&self) -> &Arc<Buffer> {
		&self.buffer
	}

	#[inline]
	pub fn backing(&self) -> &Arc<S> {
		&self.backing
	}

	/// Enqueues a fill for `page_addr` into `slot` (already admitted and
	/// transitioned FREE -> FILLING by the caller via `Buffer::acquire_for_fill`)
	/// and returns a receiver the caller blocks on for the outcome.
	pub fn submit_fill(&self, slot: SlotId, page_addr: PageAddr) -> mpsc::Receiver<FillOutcome<S::Error>> {
		let (reply, receiver) = mpsc::channel();
		self.fill_queue.push(FillRequest {
			slot,
			page_addr,
			reply,
		});
		receiver
	}

	/// Stops the eviction manager, shuts down both queues, broadcasts the
	/// `Buffer`'s own condition variables, and joins every worker thread.
	/// Callers must have already quiesced all in-flight transactions; this
	/// does not itself evict resident pages.
	///
	/// The `Buffer` broadcast matters even though the queues are also shut
	/// down: an evict worker that has already popped its token and is parked
	/// inside `acquire_oldest_present` (the FIFO head not yet `PRESENT`) is
	/// not blocked in `evict_queue.pop()`, so shutting down the queue alone
	/// never wakes it and `join` below would hang forever.
	pub fn shutdown(mut self) {
		self.running.store(false, Ordering::Relaxed);
		self.buffer.shutdown();
		self.fill_queue.shutdown();
		self.evict_queue.shutdown();
		for handle in self.threads.drain(..) {
			if handle.join().is_err() {
				error!("a buffer worker thread panicked during shutdown");
			}
		}
	}
}

fn fill_worker_loop<S: BackingStore>(
	buffer: &Buffer,
	backing: &S,
	fill_queue: &crate::work_queue::WorkQueue<FillRequest<S::Error>>,
) {
	while let Some(request) = fill_queue.pop() {
		let outcome = {
			let mut page = buffer.write_page(request.slot);
			backing.read_page(request.page_addr, &mut page)
		};

		let result = match outcome {
			Ok(()) => {
				buffer.mark_present(request.slot);
				Ok(request.slot)
			}
			Err(source) => {
				warn!(
					"fill of {} into {} failed, rolling back: {source}",
					request.page_addr, request.slot
				);
				buffer.rollback_fill(request.slot);
				Err(FillError::Read(source))
			}
		};

		// The fault handler may have stopped waiting (e.g. it was itself
		// interrupted); a dropped receiver is not this worker's problem.
		let _ = request.reply.send(result);
	}
}

/// Consumes one EVICT token per loop iteration. `outstanding` is
/// decremented exactly once per token consumed here, whether or not it
/// actually yielded a slot to evict - it is the manager's only accurate
/// signal of how many of its pushed tokens are still in flight.
fn evict_worker_loop<S: BackingStore>(
	buffer: &Buffer,
	backing: &S,
	evict_queue: &crate::work_queue::WorkQueue<()>,
	outstanding: &AtomicUsize,
	max_retries: usize,
) {
	while evict_queue.pop().is_some() {
		let Some(slot) = buffer.acquire_oldest_present() else {
			outstanding.fetch_sub(1, Ordering::Relaxed);
			continue;
		};

		if buffer.is_dirty(slot) {
			write_back_with_retry(buffer, backing, slot, max_retries);
		}

		buffer.release(slot);
		outstanding.fetch_sub(1, Ordering::Relaxed);
	}
}

fn write_back_with_retry<S: BackingStore>(buffer: &Buffer, backing: &S, slot: SlotId, max_retries: usize) {
	// `page_addr` is only known while the slot is still tracked by the
	// present index's memory of it; the descriptor keeps it through LEAVING.
	let page_addr = buffer
		.page_addr(slot)
		.expect("a LEAVING slot must still carry the page address it represented");

	let mut attempt = 0;
	loop {
		let page = buffer.read_page(slot);
		match backing.write_page(page_addr, &page) {
			Ok(()) => return,
			Err(err) => {
				drop(page);
				match backing.classify(&err) {
					ErrorClass::Transient if attempt < max_retries => {
						attempt += 1;
						warn!(
							"write-back of {page_addr} failed (attempt {attempt}/{max_retries}), retrying: {err}"
						);
						continue;
					}
					_ => {
						error!("write-back of {page_addr} failed permanently: {err}");
						panic!("dirty page {page_addr} could not be written back: {err}");
					}
				}
			}
		}
	}
}

/// Tops up the evict queue to exactly the number of evictions still needed
/// to reach `low_water`, net of tokens already pushed and not yet consumed.
///
/// `low_water_reached`/`high_water_reached` reflect the buffer's *current*
/// occupancy, which only drops once a worker actually calls `release` -
/// polling that alone and pushing a token every tick over-subscribes the
/// queue whenever write-back latency exceeds `MANAGER_POLL_INTERVAL` (always
/// true against a real disk-backed store): tokens queue up faster than they
/// drain, and the surplus keeps driving `acquire_oldest_present` well past
/// `low_water`. Tracking `outstanding` closes that gap: once enough tokens
/// are in flight to reach the target, no more are pushed until some of them
/// complete and `evict_worker_loop` decrements the counter.
fn eviction_manager_loop(
	buffer: &Buffer,
	evict_queue: &crate::work_queue::WorkQueue<()>,
	outstanding: &AtomicUsize,
	running: &AtomicBool,
) {
	while running.load(Ordering::Relaxed) {
		if buffer.high_water_reached() {
			let busy = buffer.snapshot().busy;
			let low = buffer.low_water();
			let in_flight = outstanding.load(Ordering::Relaxed);
			let needed = busy.saturating_sub(low).saturating_sub(in_flight);
			for _ in 0..needed {
				outstanding.fetch_add(1, Ordering::Relaxed);
				evict_queue.push(());
			}
		}
		thread::sleep(MANAGER_POLL_INTERVAL);
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::sync::Mutex as StdMutex;

	use crate::config::BufferConfig;

	use super::*;

	#[derive(Default)]
	struct MemoryStore {
		pages: StdMutex<HashMap<PageAddr, Vec<u8>>>,
	}

	#[derive(Debug, thiserror::Error)]
	#[error("memory store error")]
	struct MemoryStoreError;

	impl BackingStore for MemoryStore {
		type Error = MemoryStoreError;

		fn read_page(&self, addr: PageAddr, dst: &mut [u8]) -> Result<(), Self::Error> {
			if let Some(bytes) = self.pages.lock().unwrap().get(&addr) {
				dst.copy_from_slice(bytes);
			} else {
				dst.fill(0);
			}
			Ok(())
		}

		fn write_page(&self, addr: PageAddr, src: &[u8]) -> Result<(), Self::Error> {
			self.pages.lock().unwrap().insert(addr, src.to_vec());
			Ok(())
		}

		fn classify(&self, _error: &Self::Error) -> ErrorClass {
			ErrorClass::Permanent
		}
	}

	#[test]
	fn fill_then_evict_roundtrip_through_workers() {
		let buffer = Arc::new(
			Buffer::new(
				&BufferConfig {
					capacity: 4,
					low_water_percentage: 0,
					high_water_percentage: 100,
				},
				8,
			)
			.unwrap(),
		);
		let backing = Arc::new(MemoryStore::default());
		backing
			.pages
			.lock()
			.unwrap()
			.insert(PageAddr::new(1), vec![7; 8]);

		let pools = WorkerPools::spawn(Arc::clone(&buffer), Arc::clone(&backing), WorkerConfig {
			fill_threads: 1,
			evict_threads: 1,
			evict_write_retries: 1,
		});

		let slot = buffer.acquire_for_fill(PageAddr::new(1)).unwrap();
		let receiver = pools.submit_fill(slot, PageAddr::new(1));
		let outcome = receiver.recv().unwrap();
		assert_eq!(outcome.unwrap(), slot);
		assert_eq!(&*buffer.read_page(slot), &[7; 8]);

		buffer.mark_dirty(slot);
		let evicted = buffer.acquire_oldest_present().unwrap();
		assert_eq!(evicted, slot);
		buffer.release(evicted);

		pools.shutdown();
	}

	/// A backing store slow enough that one `MANAGER_POLL_INTERVAL` tick
	/// elapses before a single write-back completes - the condition under
	/// which a poll-and-push-one-token-per-tick manager would over-drain.
	#[derive(Default)]
	struct SlowMemoryStore {
		pages: StdMutex<HashMap<PageAddr, Vec<u8>>>,
	}

	impl BackingStore for SlowMemoryStore {
		type Error = MemoryStoreError;

		fn read_page(&self, addr: PageAddr, dst: &mut [u8]) -> Result<(), Self::Error> {
			if let Some(bytes) = self.pages.lock().unwrap().get(&addr) {
				dst.copy_from_slice(bytes);
			} else {
				dst.fill(0);
			}
			Ok(())
		}

		fn write_page(&self, addr: PageAddr, src: &[u8]) -> Result<(), Self::Error> {
			thread::sleep(MANAGER_POLL_INTERVAL * 5);
			self.pages.lock().unwrap().insert(addr, src.to_vec());
			Ok(())
		}

		fn classify(&self, _error: &Self::Error) -> ErrorClass {
			ErrorClass::Permanent
		}
	}

	#[test]
	fn eviction_manager_stops_at_low_water_under_slow_write_back() {
		let buffer = Arc::new(
			Buffer::new(
				&BufferConfig {
					capacity: 4,
					low_water_percentage: 50,
					high_water_percentage: 100,
				},
				8,
			)
			.unwrap(),
		);
		let backing = Arc::new(SlowMemoryStore::default());

		let slots: Vec<_> = (0..4u64)
			.map(|i| {
				let s = buffer.acquire_for_fill(PageAddr::new(i)).unwrap();
				buffer.mark_present(s);
				buffer.mark_dirty(s);
				s
			})
			.collect();

		let pools = WorkerPools::spawn(Arc::clone(&buffer), Arc::clone(&backing), WorkerConfig {
			fill_threads: 1,
			evict_threads: 2,
			evict_write_retries: 1,
		});

		// Long enough for the manager to observe high_water_reached and both
		// slow evict workers to finish draining to low_water; short enough
		// that a manager which over-subscribes tokens every tick would have
		// driven the buffer past low_water and down toward empty well before
		// this check runs.
		thread::sleep(MANAGER_POLL_INTERVAL * 40);
		assert_eq!(buffer.snapshot().busy, 2);

		pools.shutdown();

		let remaining: Vec<_> = slots
			.into_iter()
			.filter(|&s| buffer.page_addr(s).is_some())
			.collect();
		assert_eq!(remaining.len(), 2);
		for slot in remaining {
			let evicted = buffer.acquire_oldest_present().unwrap();
			buffer.release(evicted);
		}
	}
}
