use std::collections::VecDeque;

use crate::domain::view::RequestId;

/// Recyclable correlation identifiers.
///
/// Released IDs are handed out again in release order before a new one is
/// minted from the high-water mark. An ID is never handed out twice without
/// a release in between.
#[derive(Debug, Default)]
pub struct IdPool {
    free: VecDeque<RequestId>,
    high_water: RequestId,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> RequestId {
        if let Some(id) = self.free.pop_front() {
            return id;
        }
        let id = self.high_water;
        self.high_water += 1;
        id
    }

    pub fn release(&mut self, id: RequestId) {
        debug_assert!(id < self.high_water, "released id {id} was never minted");
        debug_assert!(!self.free.contains(&id), "id {id} released twice");
        self.free.push_back(id);
    }

    /// Number of IDs currently handed out.
    pub fn in_use(&self) -> usize {
        self.high_water as usize - self.free.len()
    }

    pub fn high_water(&self) -> RequestId {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_sequentially_while_pool_is_empty() {
        let mut pool = IdPool::new();
        assert_eq!(pool.acquire(), 0);
        assert_eq!(pool.acquire(), 1);
        assert_eq!(pool.acquire(), 2);
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn reuses_released_ids_in_release_order() {
        let mut pool = IdPool::new();
        let ids: Vec<_> = (0..4).map(|_| pool.acquire()).collect();
        pool.release(ids[2]);
        pool.release(ids[0]);

        assert_eq!(pool.acquire(), 2);
        assert_eq!(pool.acquire(), 0);
        assert_eq!(pool.acquire(), 4);
        assert_eq!(pool.high_water(), 5);
    }

    #[test]
    fn live_ids_never_collide() {
        let mut pool = IdPool::new();
        let mut live = std::collections::HashSet::new();
        for round in 0..50_u32 {
            let id = pool.acquire();
            assert!(live.insert(id), "id {id} handed out while still live");
            if round % 3 == 0 {
                let victim = *live.iter().next().expect("at least one live id");
                live.remove(&victim);
                pool.release(victim);
            }
        }
        assert_eq!(pool.in_use(), live.len());
    }
}
