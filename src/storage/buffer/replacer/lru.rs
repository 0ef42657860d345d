use linked_hash_map::LinkedHashMap;
use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Only unpinned frames are tracked; the front of the map is the frame that
/// became evictable longest ago.
pub struct LRUReplacer {
    lru_list: LinkedHashMap<FrameId, ()>,
}

impl LRUReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            lru_list: LinkedHashMap::with_capacity(pool_size),
        }
    }

    /// Remove a frame from the eviction order because it is in use
    pub fn pin(&mut self, frame_id: FrameId) {
        self.lru_list.remove(&frame_id);
    }

    /// Mark a frame as evictable. Unpinning an already evictable frame keeps
    /// its original position.
    pub fn unpin(&mut self, frame_id: FrameId) {
        if !self.lru_list.contains_key(&frame_id) {
            self.lru_list.insert(frame_id, ());
        }
    }

    /// Victim selection: pop the least recently unpinned frame
    pub fn victim(&mut self) -> Option<FrameId> {
        self.lru_list.pop_front().map(|(frame_id, _)| frame_id)
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.lru_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_follows_unpin_order() {
        let mut replacer = LRUReplacer::new(7);
        for frame in [1, 2, 3, 4, 5, 6] {
            replacer.unpin(frame);
        }
        replacer.unpin(1);
        assert_eq!(replacer.size(), 6);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));

        replacer.pin(3);
        replacer.pin(4);
        assert_eq!(replacer.size(), 2);

        replacer.unpin(4);
        assert_eq!(replacer.victim(), Some(5));
        assert_eq!(replacer.victim(), Some(6));
        assert_eq!(replacer.victim(), Some(4));
        assert_eq!(replacer.victim(), None);
    }
}
