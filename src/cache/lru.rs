// LRU Registry
//
// Circular doubly-linked ring of the cache slots that currently hold a live
// handle. Links are slot indices into the cache's arena, so the ring never
// aliases the entries it orders.

use super::error::CacheError;

/// Ring linkage of one slot
#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

/// Recency-ordered ring of live slots
///
/// The head is the most recently used slot and `head.prev` is the least
/// recently used one. A slot is linked exactly while its entry owns a live
/// handle; the cache keeps that in step.
#[derive(Debug, Default)]
pub struct LruRegistry {
    /// Per-slot linkage (`None` = not linked)
    links: Vec<Option<Link>>,
    /// Most recently used slot
    head: Option<usize>,
    /// Number of linked slots
    len: usize,
}

impl LruRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry with room for `slots` slots
    pub fn with_capacity(slots: usize) -> Self {
        Self {
            links: Vec::with_capacity(slots),
            head: None,
            len: 0,
        }
    }

    /// Number of linked slots
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Most recently used slot, if any
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Whether `slot` is the most recently used slot
    pub fn is_head(&self, slot: usize) -> bool {
        self.head == Some(slot)
    }

    /// Whether `slot` is currently part of the ring
    pub fn is_linked(&self, slot: usize) -> bool {
        matches!(self.links.get(slot), Some(Some(_)))
    }

    /// Move `slot` to the head of the ring
    ///
    /// An unlinked slot is spliced in just before the current head (that
    /// is, at the recency end of the ring). A linked slot is unlinked first.
    pub fn promote(&mut self, slot: usize) {
        if self.is_head(slot) {
            return;
        }
        if self.is_linked(slot) {
            self.unlink(slot);
        }
        if self.links.len() <= slot {
            self.links.resize(slot + 1, None);
        }

        match self.head {
            None => {
                self.links[slot] = Some(Link {
                    prev: slot,
                    next: slot,
                });
            }
            Some(head) => {
                let tail = self.link(head).prev;
                self.links[slot] = Some(Link {
                    prev: tail,
                    next: head,
                });
                self.link_mut(tail).next = slot;
                self.link_mut(head).prev = slot;
            }
        }

        self.head = Some(slot);
        self.len += 1;
    }

    /// Unlink `slot` from the ring
    ///
    /// # Errors
    /// `InvariantViolation` if the slot is not linked. Debug builds panic
    /// instead, since it means the cache lost track of a live handle.
    pub fn remove(&mut self, slot: usize) -> Result<(), CacheError> {
        debug_assert!(self.is_linked(slot), "removing unlinked slot {}", slot);
        if !self.is_linked(slot) {
            return Err(CacheError::InvariantViolation(
                "removed a slot that is not in the LRU ring",
            ));
        }
        self.unlink(slot);
        Ok(())
    }

    /// Find the least recently used slot satisfying `pred`
    ///
    /// The walk starts at `head.prev` and goes backward through every
    /// linked slot, so the head itself is examined last. Returns `None`
    /// when the walk comes back to its start without a match, including
    /// the empty ring.
    pub fn least_recently_used_where<F>(&self, mut pred: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        let head = self.head?;
        let start = self.link(head).prev;
        let mut slot = start;
        loop {
            if pred(slot) {
                return Some(slot);
            }
            slot = self.link(slot).prev;
            if slot == start {
                return None;
            }
        }
    }

    /// Iterate linked slots from most to least recently used
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            next: self.head,
            remaining: self.len,
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Link { prev, next } = self.link(slot);

        if next == slot {
            self.head = None;
        } else {
            self.link_mut(prev).next = next;
            self.link_mut(next).prev = prev;
            if self.head == Some(slot) {
                self.head = Some(next);
            }
        }

        self.links[slot] = None;
        self.len -= 1;
    }

    // Only called on slots reached through the ring, which are always linked.
    fn link(&self, slot: usize) -> Link {
        match self.links[slot] {
            Some(link) => link,
            None => unreachable!("ring points at unlinked slot {}", slot),
        }
    }

    fn link_mut(&mut self, slot: usize) -> &mut Link {
        match self.links[slot].as_mut() {
            Some(link) => link,
            None => unreachable!("ring points at unlinked slot {}", slot),
        }
    }
}

/// Iterator over linked slots, most recently used first
pub struct Iter<'a> {
    registry: &'a LruRegistry,
    next: Option<usize>,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.next?;
        self.remaining -= 1;
        self.next = Some(self.registry.link(slot).next);
        Some(slot)
    }
}
