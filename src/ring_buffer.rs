//! Fixed-capacity circular buffer with overwrite-on-full semantics.
//!
//! The backing storage is rounded up to the next power of two so that index
//! wraparound is a mask instead of a modulo. When the buffer is full, `push`
//! overwrites the oldest element; that loss is expected behaviour for
//! telemetry-style buffering, not an error.
//!
//! The buffer has no internal locking. Share it between threads behind a
//! `parking_lot::Mutex` or keep it confined to one owner.

use std::fmt;
use std::iter::FusedIterator;

use crate::error::CapacityError;

/// A bounded FIFO that overwrites its oldest element when full.
#[derive(Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
    mask: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding at least `max_size` elements.
    ///
    /// The real capacity is the smallest power of two `>= max_size`. Fails with
    /// [`CapacityError`] when `max_size` is zero or rounding would overflow.
    pub fn new(max_size: usize) -> Result<Self, CapacityError> {
        if max_size == 0 {
            return Err(CapacityError::new(max_size));
        }
        let capacity = max_size
            .checked_next_power_of_two()
            .ok_or(CapacityError::new(max_size))?;

        let mut slots = Vec::new();
        slots.resize_with(capacity, || None);

        Ok(Self {
            slots,
            head: 0,
            tail: 0,
            len: 0,
            mask: capacity - 1,
        })
    }

    /// Number of slots in the buffer (always a power of two).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of elements currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if the next push will overwrite the oldest element.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Appends `item` as the newest element.
    ///
    /// If the buffer was full the oldest element is overwritten and returned.
    pub fn push(&mut self, item: T) -> Option<T> {
        let overwritten = if self.is_full() {
            let old = self.slots[self.head].take();
            self.head = (self.head + 1) & self.mask;
            old
        } else {
            self.len += 1;
            None
        };

        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) & self.mask;
        overwritten
    }

    /// Removes and returns the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) & self.mask;
        self.len -= 1;
        item
    }

    /// The oldest element, without removing it.
    pub fn peek_front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// The newest element, without removing it.
    pub fn peek_back(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.tail.wrapping_sub(1) & self.mask].as_ref()
    }

    /// Drops every element and zeroes the indices.
    ///
    /// Slots are released immediately rather than left for the next overwrite,
    /// so large elements are not retained after a clear.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    /// Iterates from oldest to newest without consuming anything.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            buffer: self,
            front: 0,
            back: self.len,
        }
    }

    /// Removes elements oldest first.
    ///
    /// The buffer is empty once the returned iterator is dropped, even if it
    /// was not exhausted.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { buffer: self }
    }

    /// Returns the first element, oldest first, matching `predicate`.
    pub fn find<P>(&self, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().find(|item| predicate(*item))
    }

    /// Counts the elements matching `predicate`.
    pub fn count_matching<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().filter(|item| predicate(*item)).count()
    }

    /// Returns `true` if an element equal to `item` is stored.
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|x| x == item)
    }

    /// Copies the contents into a vector, oldest first.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }

    fn slot(&self, offset: usize) -> Option<&T> {
        self.slots[(self.head + offset) & self.mask].as_ref()
    }
}

impl<T: fmt::Debug> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Extend<T> for RingBuffer<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

impl<'a, T> IntoIterator for &'a RingBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowing iterator over a [`RingBuffer`], oldest to newest.
pub struct Iter<'a, T> {
    buffer: &'a RingBuffer<T>,
    front: usize,
    back: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let item = self.buffer.slot(self.front);
        self.front += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.buffer.slot(self.back)
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

/// Draining iterator returned by [`RingBuffer::drain`].
pub struct Drain<'a, T> {
    buffer: &'a mut RingBuffer<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.buffer.pop()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.buffer.len, Some(self.buffer.len))
    }
}

impl<T> ExactSizeIterator for Drain<'_, T> {}

impl<T> FusedIterator for Drain<'_, T> {}

impl<T> Drop for Drain<'_, T> {
    fn drop(&mut self) {
        self.buffer.clear();
    }
}
