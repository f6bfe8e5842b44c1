use std::fmt;

use crate::addr::PageAddr;

/// Identity of a descriptor slot in the `Buffer`'s fixed pool.
///
/// Slots are never individually heap-allocated; `SlotId` is just an index
/// into the fixed-size arrays the `Buffer` and `PageStore` both share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
	#[inline]
	pub(crate) fn index(self) -> usize {
		self.0
	}
}

impl fmt::Display for SlotId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "slot#{}", self.0)
	}
}

/// The lifecycle states of a `PageDescriptor` (see state diagram in the
/// module docs on [`crate::buffer`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
	Free,
	Filling,
	Present,
	Updating,
	Leaving,
}

impl fmt::Display for PageState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Free => "FREE",
			Self::Filling => "FILLING",
			Self::Present => "PRESENT",
			Self::Updating => "UPDATING",
			Self::Leaving => "LEAVING",
		};
		f.write_str(name)
	}
}

/// A single descriptor slot: the virtual address it currently represents
/// (meaningless while `Free`), its dirty flag, and its state.
///
/// All fields are mutated exclusively by the thread that holds the
/// `Buffer`'s mutex, or - for the transient states - by whichever worker
/// currently owns the transition (see `docs` on [`crate::buffer::Buffer`]).
#[derive(Debug)]
pub(crate) struct PageDescriptor {
	pub page_addr: Option<PageAddr>,
	pub dirty: bool,
	pub state: PageState,
}

impl Default for PageDescriptor {
	fn default() -> Self {
		Self {
			page_addr: None,
			dirty: false,
			state: PageState::Free,
		}
	}
}

/// Panics naming the illegal `from -> to` transition. Invalid transitions are
/// programming errors: there is no recoverable path.
#[track_caller]
pub(crate) fn fatal_transition(slot: SlotId, from: PageState, to: PageState) -> ! {
	log::error!("illegal page state transition on {slot}: {from} -> {to}");
	panic!("illegal page state transition on {slot}: {from} -> {to}");
}

impl PageDescriptor {
	/// Asserts `self.state == from`, then sets `self.state = to`. Used by the
	/// `Buffer` at every transition point so that an unreachable transition
	/// is always a panic naming the offending pair, never a silent no-op.
	pub(crate) fn transition(&mut self, slot: SlotId, from: PageState, to: PageState) {
		if self.state != from {
			fatal_transition(slot, self.state, to);
		}
		self.state = to;
	}
}
