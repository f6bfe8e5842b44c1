//! A typed, blocking FIFO work queue with shutdown semantics.
//!
//! One instance backs each worker role (fill, evict); `WorkQueue<T>` is
//! generic rather than a single queue of a tagged enum across roles, since
//! the worker pools are already split by role and a generic queue avoids an
//! unused-variant match arm in every consumer.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
	items: VecDeque<T>,
	shutdown: bool,
}

pub(crate) struct WorkQueue<T> {
	inner: Mutex<Inner<T>>,
	not_empty: Condvar,
}

impl<T> WorkQueue<T> {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				items: VecDeque::new(),
				shutdown: false,
			}),
			not_empty: Condvar::new(),
		}
	}

	/// Appends an item and wakes one blocked consumer.
	pub fn push(&self, item: T) {
		let mut inner = self.inner.lock();
		inner.items.push_back(item);
		self.not_empty.notify_one();
	}

	/// Blocks until an item is available or the queue is shut down.
	pub fn pop(&self) -> Option<T> {
		let mut inner = self.inner.lock();
		loop {
			if let Some(item) = inner.items.pop_front() {
				return Some(item);
			}
			if inner.shutdown {
				return None;
			}
			self.not_empty.wait(&mut inner);
		}
	}

	/// Marks the queue as shut down and wakes every blocked consumer; they
	/// drain remaining items first and only then see `None`.
	pub fn shutdown(&self) {
		let mut inner = self.inner.lock();
		inner.shutdown = true;
		self.not_empty.notify_all();
	}

	pub fn len(&self) -> usize {
		self.inner.lock().items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<T> Default for WorkQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}
