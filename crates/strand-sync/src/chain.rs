//! Sentinel-terminated node chain.
//!
//! The chain is a singly linked list of heap nodes. The last node is always an
//! empty sentinel marking the next insertion point, so an empty chain is one
//! where the head and tail pointers are equal.
//!
//! ```text
//!   head                              tail
//!    |                                  |
//!    v                                  v
//! +-----+    +-----+    +-----+    +--------+
//! |  a  | -> |  b  | -> |  c  | -> |sentinel|
//! +-----+    +-----+    +-----+    +--------+
//! ```
//!
//! Ownership of every node rests with whoever owns the head pointer; the tail
//! pointer is a non-owning reference into the same chain. The queue keeps the
//! two ends behind separate locks, so the functions here take raw pointers and
//! leave the synchronization contract to the caller.

use std::ptr::NonNull;

/// A storage cell in the chain.
pub(crate) struct Node<T> {
    value: Option<T>,
    next: Option<NonNull<Node<T>>>,
}

impl<T> Node<T> {
    /// Allocate a fresh sentinel and leak it into a raw pointer.
    ///
    /// Ownership passes to the chain once the sentinel is linked in via
    /// [`append`].
    pub(crate) fn sentinel() -> NonNull<Self> {
        NonNull::from(Box::leak(Box::new(Self {
            value: None,
            next: None,
        })))
    }
}

/// Store `value` in the current sentinel and link `new_sentinel` after it.
///
/// # Safety
///
/// - `tail` must be the live tail of a chain and `new_sentinel` a node freshly
///   produced by [`Node::sentinel`] that is not linked anywhere.
/// - The caller must hold exclusive access to the tail end of the chain. No
///   other thread may read or write the `tail` node for the duration of the
///   call; readers of the head end must observe `head == tail` (and therefore
///   not touch the node) until the caller's lock release publishes the write.
pub(crate) unsafe fn append<T>(tail: NonNull<Node<T>>, value: T, new_sentinel: NonNull<Node<T>>) {
    // SAFETY: exclusive access to the tail node per the contract above.
    let node = unsafe { &mut *tail.as_ptr() };
    debug_assert!(node.value.is_none(), "tail sentinel must be empty");
    debug_assert!(node.next.is_none(), "tail sentinel must be last");
    node.value = Some(value);
    node.next = Some(new_sentinel);
}

/// Detach the head node, returning its payload and the new head.
///
/// The detached node is freed.
///
/// # Safety
///
/// - `head` must be the live head of a chain and must not be the tail, i.e. the
///   caller has observed `head != tail` under the tail lock after the push that
///   filled the node released it.
/// - The caller must hold exclusive access to the head end of the chain.
pub(crate) unsafe fn detach<T>(head: NonNull<Node<T>>) -> (T, NonNull<Node<T>>) {
    // SAFETY: the node was allocated by `Node::sentinel` via `Box`, is not the
    // tail, and only the head owner can reach it, so we may reclaim the box.
    let mut node = unsafe { Box::from_raw(head.as_ptr()) };
    let value = node
        .value
        .take()
        .expect("nodes before the tail hold a value");
    let next = node.next.take().expect("nodes before the tail have a successor");
    (value, next)
}

/// Free every node reachable from `head`, dropping any payloads still stored.
///
/// # Safety
///
/// The caller must own the entire chain: no other pointer into it may be used
/// after this call.
pub(crate) unsafe fn free<T>(head: NonNull<Node<T>>) {
    let mut cursor = Some(head);
    while let Some(ptr) = cursor {
        // SAFETY: every node was allocated through `Box` and is visited once.
        let node = unsafe { Box::from_raw(ptr.as_ptr()) };
        cursor = node.next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_append_then_detach_in_order() {
        let head = Node::sentinel();
        let mut tail = head;

        for value in 1..=3 {
            let next = Node::sentinel();
            unsafe { append(tail, value, next) };
            tail = next;
        }

        let mut head = head;
        let mut seen = Vec::new();
        while head != tail {
            let (value, next) = unsafe { detach(head) };
            seen.push(value);
            head = next;
        }
        assert_eq!(seen, vec![1, 2, 3]);

        unsafe { free(head) };
    }

    #[test]
    fn test_free_drops_pending_values() {
        let tracker = Rc::new(());
        let head = Node::sentinel();
        let mut tail = head;

        for _ in 0..4 {
            let next = Node::sentinel();
            unsafe { append(tail, Rc::clone(&tracker), next) };
            tail = next;
        }
        assert_eq!(Rc::strong_count(&tracker), 5);

        unsafe { free(head) };
        assert_eq!(Rc::strong_count(&tracker), 1);
    }
}
