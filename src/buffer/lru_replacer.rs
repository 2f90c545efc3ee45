use parking_lot::Mutex;

use crate::common::FrameId;

/// Intrusive list node for one frame. The list is threaded by frame id:
/// `prev`/`next` are frame ids, and presence of the node in the table means
/// the frame is evictable.
#[derive(Debug, Clone, Copy)]
struct LruNode {
    prev: Option<FrameId>,
    next: Option<FrameId>,
}

struct LruList {
    /// Direct-index table: frame id -> list node, None when not evictable
    nodes: Vec<Option<LruNode>>,
    /// Least recently unpinned frame (eviction candidate)
    head: Option<FrameId>,
    /// Most recently unpinned frame
    tail: Option<FrameId>,
    /// Number of evictable frames
    len: usize,
}

impl LruList {
    fn unlink(&mut self, frame_id: FrameId) -> bool {
        let node = match self.nodes[frame_id.as_usize()].take() {
            Some(node) => node,
            None => return false,
        };

        match node.prev {
            Some(prev) => {
                self.nodes[prev.as_usize()]
                    .as_mut()
                    .expect("prev link points at a live node")
                    .next = node.next;
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                self.nodes[next.as_usize()]
                    .as_mut()
                    .expect("next link points at a live node")
                    .prev = node.prev;
            }
            None => self.tail = node.prev,
        }

        self.len -= 1;
        true
    }

    fn push_back(&mut self, frame_id: FrameId) {
        let node = LruNode {
            prev: self.tail,
            next: None,
        };
        self.nodes[frame_id.as_usize()] = Some(node);

        match self.tail {
            Some(tail) => {
                self.nodes[tail.as_usize()]
                    .as_mut()
                    .expect("tail points at a live node")
                    .next = Some(frame_id);
            }
            None => self.head = Some(frame_id),
        }
        self.tail = Some(frame_id);
        self.len += 1;
    }
}

/// LRU replacement policy over the evictable frames of the buffer pool.
///
/// A frame enters the evictable set when its pin count drops to zero
/// (`unpin`) and leaves it when it is pinned again (`pin`) or chosen as a
/// victim. `victim` returns the frame whose `unpin` is oldest. All four
/// operations are O(1).
pub struct LruReplacer {
    list: Mutex<LruList>,
}

impl LruReplacer {
    /// Creates a replacer able to track `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            list: Mutex::new(LruList {
                nodes: vec![None; num_frames],
                head: None,
                tail: None,
                len: 0,
            }),
        }
    }

    /// Removes and returns the least recently unpinned frame, or None if
    /// no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut list = self.list.lock();
        let frame_id = list.head?;
        list.unlink(frame_id);
        Some(frame_id)
    }

    /// Removes the frame from the evictable set if present.
    pub fn pin(&self, frame_id: FrameId) {
        let mut list = self.list.lock();
        if frame_id.as_usize() < list.nodes.len() {
            list.unlink(frame_id);
        }
    }

    /// Adds the frame at the most-recent end of the evictable set.
    /// No-op if the frame is already evictable.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.list.lock();
        if frame_id.as_usize() >= list.nodes.len() {
            return;
        }
        if list.nodes[frame_id.as_usize()].is_some() {
            return;
        }
        list.push_back(frame_id);
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.list.lock().len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_new() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_victim_order() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(2));
        replacer.unpin(FrameId::new(0));
        replacer.unpin(FrameId::new(7));
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), Some(FrameId::new(0)));
        assert_eq!(replacer.victim(), Some(FrameId::new(7)));
        assert_eq!(replacer.victim(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_unpin_idempotent() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.size(), 1);

        // Re-unpinning must not refresh recency either
        replacer.unpin(FrameId::new(3));
        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));
    }

    #[test]
    fn test_lru_replacer_pin_removes() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(0));
        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));

        replacer.pin(FrameId::new(1));
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(FrameId::new(0)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));

        // Pinning an absent frame is a no-op
        replacer.pin(FrameId::new(5));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_pin_middle_relinks() {
        let replacer = LruReplacer::new(10);

        for i in 0..5 {
            replacer.unpin(FrameId::new(i));
        }
        replacer.pin(FrameId::new(2));
        replacer.unpin(FrameId::new(2));

        let order: Vec<_> = std::iter::from_fn(|| replacer.victim()).collect();
        assert_eq!(
            order,
            vec![
                FrameId::new(0),
                FrameId::new(1),
                FrameId::new(3),
                FrameId::new(4),
                FrameId::new(2)
            ]
        );
    }

    #[test]
    fn test_lru_replacer_pin_unpin_cycle() {
        let replacer = LruReplacer::new(3);

        replacer.unpin(FrameId::new(0));
        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.size(), 2);

        replacer.pin(FrameId::new(0));
        replacer.pin(FrameId::new(1));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);

        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    }

    #[test]
    fn test_lru_replacer_out_of_bounds() {
        let replacer = LruReplacer::new(5);

        replacer.unpin(FrameId::new(100));
        replacer.pin(FrameId::new(100));
        assert_eq!(replacer.size(), 0);
    }
}
