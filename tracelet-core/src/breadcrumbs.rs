use std::collections::VecDeque;

use crate::protocol::Breadcrumb;

/// The default number of breadcrumbs kept on a scope.
pub(crate) const DEFAULT_MAX_BREADCRUMBS: usize = 100;

/// A helper trait that converts self into an Iterator of Breadcrumbs.
///
/// This is used for the [`add_breadcrumb`] function.
///
/// [`add_breadcrumb`]: fn.add_breadcrumb.html
pub trait IntoBreadcrumbs {
    /// The iterator type for the breadcrumbs.
    type Output: Iterator<Item = Breadcrumb>;

    /// This converts the object into an optional breadcrumb.
    fn into_breadcrumbs(self) -> Self::Output;
}

impl IntoBreadcrumbs for Breadcrumb {
    type Output = std::iter::Once<Breadcrumb>;

    fn into_breadcrumbs(self) -> Self::Output {
        std::iter::once(self)
    }
}

impl IntoBreadcrumbs for Vec<Breadcrumb> {
    type Output = std::vec::IntoIter<Breadcrumb>;

    fn into_breadcrumbs(self) -> Self::Output {
        self.into_iter()
    }
}

impl IntoBreadcrumbs for Option<Breadcrumb> {
    type Output = std::option::IntoIter<Breadcrumb>;

    fn into_breadcrumbs(self) -> Self::Output {
        self.into_iter()
    }
}

impl<F: FnOnce() -> I, I: IntoBreadcrumbs> IntoBreadcrumbs for F {
    type Output = I::Output;

    fn into_breadcrumbs(self) -> Self::Output {
        self().into_breadcrumbs()
    }
}

/// A bounded, ordered log of recent breadcrumbs.
///
/// Once the buffer holds `capacity` entries, every push evicts the oldest
/// one.  A buffer with a capacity of zero stores nothing.
#[derive(Clone, Debug, PartialEq)]
pub struct BreadcrumbBuffer {
    capacity: usize,
    items: VecDeque<Breadcrumb>,
}

impl Default for BreadcrumbBuffer {
    fn default() -> Self {
        BreadcrumbBuffer::new(DEFAULT_MAX_BREADCRUMBS)
    }
}

impl BreadcrumbBuffer {
    /// Creates an empty buffer holding at most `capacity` breadcrumbs.
    pub fn new(capacity: usize) -> Self {
        BreadcrumbBuffer {
            capacity,
            items: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_BREADCRUMBS)),
        }
    }

    /// The maximum number of breadcrumbs kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, dropping the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.truncate();
    }

    /// Appends a breadcrumb.
    ///
    /// Returns the breadcrumb that no longer fits, which is the oldest
    /// entry, or `breadcrumb` itself when the capacity is zero.
    pub fn push(&mut self, breadcrumb: Breadcrumb) -> Option<Breadcrumb> {
        if self.capacity == 0 {
            return Some(breadcrumb);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(breadcrumb);
        evicted
    }

    /// The number of stored breadcrumbs.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no breadcrumbs are stored.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes all breadcrumbs.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterates over the breadcrumbs, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Breadcrumb> + ExactSizeIterator {
        self.items.iter()
    }

    /// Copies the breadcrumbs into a `Vec`, oldest first.
    pub fn snapshot(&self) -> Vec<Breadcrumb> {
        self.items.iter().cloned().collect()
    }

    fn truncate(&mut self) {
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }
}

/// Drops the oldest entries of `crumbs` beyond `capacity`.
pub(crate) fn keep_newest(crumbs: &mut Vec<Breadcrumb>, capacity: usize) {
    let excess = crumbs.len().saturating_sub(capacity);
    crumbs.drain(..excess);
}
