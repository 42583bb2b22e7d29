//! # Intrusive List
//!
//! The one queue container used everywhere in the kernel: ready queues,
//! the delayed/blocked/exited queues, and semaphore wait queues.
//!
//! Elements live in a fixed arena (the TCB table) and are identified by
//! their slot index. Each element embeds one [`Link`] per queue family it
//! can belong to; a [`List`] is just a handle naming the head slot of a
//! circular doubly-linked ring threaded through those links. Insertion and
//! removal are O(1) and never allocate, and an element can be a member of
//! at most one list per embedded link.
//!
//! Because the same arena element may carry several links (a TCB has one
//! for the scheduler queues and one for semaphore wait queues), the list
//! operations do not touch the arena directly. They go through a
//! [`LinkAccess`] projection that picks the right link out of a slot.

use core::ops::ControlFlow;

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Intrusive linkage embedded in an arena element.
///
/// Both fields are `Some` while the element is in a list and `None`
/// otherwise. The ring is circular: a sole member points at itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    prev: Option<usize>,
    next: Option<usize>,
}

impl Link {
    /// An unlinked link, for arena slot initializers.
    pub const EMPTY: Link = Link {
        prev: None,
        next: None,
    };

    /// Whether this element is currently a member of some list.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.next.is_some()
    }
}

/// Projects a [`Link`] out of an arena slot.
///
/// Implemented by thin view types over the TCB table, one per queue family,
/// so a single list implementation serves queues threaded through different
/// links of the same element.
pub trait LinkAccess {
    fn link(&self, slot: usize) -> &Link;
    fn link_mut(&mut self, slot: usize) -> &mut Link;
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Handle to a circular doubly-linked ring of arena slots.
///
/// The handle only records which slot is the head; all structure lives in
/// the elements' embedded links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct List {
    head: Option<usize>,
}

impl List {
    /// An empty list, for static initializers.
    pub const EMPTY: List = List { head: None };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Peek at the head slot without detaching it.
    #[inline]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Peek at the tail slot without detaching it. The tail is the head's
    /// `prev` neighbor in the ring.
    pub fn tail<A: LinkAccess>(&self, links: &A) -> Option<usize> {
        self.head.map(|h| links.link(h).prev.unwrap_or(h))
    }

    /// Insert `slot` as the new tail.
    ///
    /// The slot must not currently be a member of any list reached through
    /// the same link.
    pub fn append<A: LinkAccess>(&mut self, links: &mut A, slot: usize) {
        self.insert(links, slot, false);
    }

    /// Insert `slot` as the new head.
    pub fn prepend<A: LinkAccess>(&mut self, links: &mut A, slot: usize) {
        self.insert(links, slot, true);
    }

    /// Append and prepend differ only in which ring entry the handle names
    /// as head afterwards, so both funnel here.
    fn insert<A: LinkAccess>(&mut self, links: &mut A, slot: usize, make_head: bool) {
        debug_assert!(!links.link(slot).is_linked());
        match self.head {
            None => {
                // Sole member: a one-entry ring pointing at itself.
                *links.link_mut(slot) = Link {
                    prev: Some(slot),
                    next: Some(slot),
                };
                self.head = Some(slot);
            }
            Some(head) => {
                let tail = links.link(head).prev.unwrap_or(head);
                *links.link_mut(slot) = Link {
                    prev: Some(tail),
                    next: Some(head),
                };
                links.link_mut(tail).next = Some(slot);
                links.link_mut(head).prev = Some(slot);
                if make_head {
                    self.head = Some(slot);
                }
            }
        }
    }

    /// Detach `slot` from this list. The caller keeps ownership of the
    /// underlying element.
    ///
    /// Removing the sole member empties the list; removing the head
    /// advances the head to its `next` neighbor.
    pub fn remove<A: LinkAccess>(&mut self, links: &mut A, slot: usize) {
        let link = *links.link(slot);
        let (prev, next) = match (link.prev, link.next) {
            (Some(p), Some(n)) => (p, n),
            // Not linked; nothing to do.
            _ => return,
        };
        if next == slot {
            // Sole member.
            self.head = None;
        } else {
            if self.head == Some(slot) {
                self.head = Some(next);
            }
            links.link_mut(prev).next = Some(next);
            links.link_mut(next).prev = Some(prev);
        }
        *links.link_mut(slot) = Link::EMPTY;
    }

    /// Detach and return the head slot.
    pub fn pop_head<A: LinkAccess>(&mut self, links: &mut A) -> Option<usize> {
        let head = self.head?;
        self.remove(links, head);
        Some(head)
    }

    /// Visit each member in ring order starting at the head, stopping when
    /// `f` breaks or the ring is exhausted. Returns the last slot visited
    /// (not the one after it), or `None` for an empty list.
    pub fn iterate<A, F>(&self, links: &A, mut f: F) -> Option<usize>
    where
        A: LinkAccess,
        F: FnMut(usize) -> ControlFlow<()>,
    {
        let head = self.head?;
        let mut current = head;
        loop {
            let flow = f(current);
            let next = links.link(current).next.unwrap_or(head);
            if flow.is_break() || next == head {
                return Some(current);
            }
            current = next;
        }
    }

    /// Whether `slot` is a member of this list.
    pub fn contains<A: LinkAccess>(&self, links: &A, slot: usize) -> bool {
        let mut found = false;
        self.iterate(links, |s| {
            if s == slot {
                found = true;
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        found
    }

    /// Number of members. Iteration-based; used for diagnostics and tests.
    pub fn len<A: LinkAccess>(&self, links: &A) -> usize {
        let mut n = 0;
        self.iterate(links, |_| {
            n += 1;
            ControlFlow::Continue(())
        });
        n
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
