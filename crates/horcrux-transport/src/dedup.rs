//! Cross-relay event deduplication. The same gift wrap often arrives from
//! several relays; downstream engines should see it exactly once
//! (SPEC_FULL.md C.1 and C.5 share this component).

use lru::LruCache;
use std::num::NonZeroUsize;

use horcrux_core::EventId;

pub struct EventDedup {
    seen: LruCache<EventId, ()>,
}

impl EventDedup {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { seen: LruCache::new(capacity) }
    }

    /// Returns `true` if `id` has already been seen, recording it either way.
    pub fn seen(&mut self, id: &EventId) -> bool {
        if self.seen.get(id).is_some() {
            true
        } else {
            self.seen.put(*id, ());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_new_second_is_duplicate() {
        let mut dedup = EventDedup::new(4);
        let id = EventId::from_bytes([7u8; 32]);
        assert!(!dedup.seen(&id));
        assert!(dedup.seen(&id));
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let mut dedup = EventDedup::new(2);
        let a = EventId::from_bytes([1u8; 32]);
        let b = EventId::from_bytes([2u8; 32]);
        let c = EventId::from_bytes([3u8; 32]);
        assert!(!dedup.seen(&a));
        assert!(!dedup.seen(&b));
        assert!(!dedup.seen(&c));
        // `a` was least-recently-used and should have been evicted to fit `c`.
        assert!(!dedup.seen(&a));
    }
}
