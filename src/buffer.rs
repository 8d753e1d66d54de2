//! # Buffers
//!
//! A [`Buffer`] is the edge of a component graph: an unbounded FIFO that links
//! exactly one output port to exactly one input port. Both ends hold a handle
//! onto the same queue; the producer appends with [`Buffer::send`] and the
//! consumer pops with [`Buffer::receive`].
//!
//! Buffers live inside a single replica and are only touched by the replica's
//! own scheduler thread, so they use `Rc<RefCell<_>>` rather than a lock.
//!
//! There is no capacity bound. Flow control is the job of the cooperative
//! scheduler: a producer that outruns its consumer grows the queue without limit.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Unbounded, non-blocking FIFO shared by one producer port and one consumer port.
///
/// Cloning a `Buffer` yields a second handle onto the same queue.
pub struct Buffer<T> {
  items: Rc<RefCell<VecDeque<T>>>,
}

impl<T> Buffer<T> {
  /// Creates an empty buffer.
  pub fn new() -> Self {
    Self {
      items: Rc::new(RefCell::new(VecDeque::new())),
    }
  }

  /// Appends an item at the tail. Never blocks.
  pub fn send(&self, item: T) {
    self.items.borrow_mut().push_back(item);
  }

  /// Pops the head item, or returns `None` when the buffer is empty.
  pub fn receive(&self) -> Option<T> {
    self.items.borrow_mut().pop_front()
  }

  /// Current queue depth.
  pub fn len(&self) -> usize {
    self.items.borrow().len()
  }

  /// Returns `true` when nothing is queued.
  pub fn is_empty(&self) -> bool {
    self.items.borrow().is_empty()
  }

  /// Returns `true` if both handles point at the same queue.
  pub fn same_queue(&self, other: &Buffer<T>) -> bool {
    Rc::ptr_eq(&self.items, &other.items)
  }
}

impl<T> Clone for Buffer<T> {
  fn clone(&self) -> Self {
    Self {
      items: Rc::clone(&self.items),
    }
  }
}

impl<T> Default for Buffer<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> fmt::Debug for Buffer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Buffer").field("len", &self.len()).finish()
  }
}
