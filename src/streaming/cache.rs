//! Bounded tile cache
//!
//! Holds every tile the terrain currently tracks (pending, resident or
//! being evicted), an expiration counter per tile and the queue of tiles
//! waiting for a free load slot. When the cache is full, the least recently
//! drawn resident tile that is not visible this frame is evicted first;
//! tiles still waiting for data are never evicted to make room.

use std::collections::HashMap;

use super::tile::{Tile, TileId};

/// A wanted tile that has not been handed to the loader yet
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingLoad {
    pub id: TileId,
    pub level: u32,
    /// Distance from the viewer when queued; nearest loads first
    pub distance: f32,
}

/// LRU cache for tiles
pub struct TileCache {
    /// Map of tile ids to tiles
    tiles: HashMap<TileId, Tile>,
    /// Frames left before eviction, per tile
    expiration: HashMap<TileId, u32>,
    /// Draw order: least recently drawn first
    access_order: Vec<TileId>,
    /// Queued loads, nearest first
    pending: Vec<PendingLoad>,
    /// Maximum number of tiles to hold
    capacity: usize,
}

impl TileCache {
    /// Create a new tile cache
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of tiles to keep
    pub fn new(capacity: usize) -> Self {
        Self {
            tiles: HashMap::with_capacity(capacity),
            expiration: HashMap::with_capacity(capacity),
            access_order: Vec::with_capacity(capacity),
            pending: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the bound; takes effect on the next insertion
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(&id)
    }

    pub fn get_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.tiles.get_mut(&id)
    }

    /// Insert a tile with a fresh expiration counter
    ///
    /// If the cache is at capacity, the least recently drawn evictable tile
    /// is removed first. A tile with the same id is replaced.
    ///
    /// # Returns
    /// The evicted tile if one was removed to make space, or the replaced tile
    pub fn insert(&mut self, tile: Tile, expiration: u32) -> Option<Tile> {
        let id = tile.id;

        if self.tiles.contains_key(&id) {
            self.remove_from_access_order(id);
        }

        let evicted = if self.is_full() && !self.tiles.contains_key(&id) {
            self.evict_oldest()
        } else {
            None
        };

        let replaced = self.tiles.insert(id, tile);
        self.expiration.insert(id, expiration);
        self.access_order.push(id);

        evicted.or(replaced)
    }

    /// Remove a tile and its counter
    pub fn remove(&mut self, id: TileId) -> Option<Tile> {
        self.remove_from_access_order(id);
        self.expiration.remove(&id);
        self.tiles.remove(&id)
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.tiles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tiles.len() >= self.capacity
    }

    /// Least recently drawn resident tile that is not visible
    pub fn oldest_evictable(&self) -> Option<TileId> {
        self.access_order
            .iter()
            .copied()
            .find(|id| self.tiles.get(id).is_some_and(|t| !t.visible && t.data.is_some()))
    }

    /// Evict the least recently drawn resident tile that is not visible
    ///
    /// # Returns
    /// The evicted tile, or `None` when nothing resident is off screen
    pub fn evict_oldest(&mut self) -> Option<Tile> {
        let id = self.oldest_evictable()?;
        self.remove(id)
    }

    /// Ids of all tracked tiles, in no particular order
    pub fn ids(&self) -> Vec<TileId> {
        self.tiles.keys().copied().collect()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Mark a tile as drawn (most recently used)
    pub fn touch(&mut self, id: TileId) {
        if self.tiles.contains_key(&id) {
            self.update_access_order(id);
        }
    }

    /// Restart a tile's expiration countdown
    pub fn reset_expiration(&mut self, id: TileId, frames: u32) {
        if let Some(counter) = self.expiration.get_mut(&id) {
            *counter = frames;
        }
    }

    /// Count one frame outside the preload radius
    ///
    /// # Returns
    /// Frames left; 0 means the tile is due for eviction
    pub fn tick_expiration(&mut self, id: TileId) -> u32 {
        match self.expiration.get_mut(&id) {
            Some(counter) => {
                *counter = counter.saturating_sub(1);
                *counter
            }
            None => 0,
        }
    }

    pub fn expiration(&self, id: TileId) -> Option<u32> {
        self.expiration.get(&id).copied()
    }

    /// Queue a load, replacing any queued load of the same tile
    pub fn enqueue(&mut self, load: PendingLoad) {
        self.dequeue(load.id);
        let at = self.pending.partition_point(|p| p.distance <= load.distance);
        self.pending.insert(at, load);
    }

    /// Take the nearest queued load
    pub fn dequeue_nearest(&mut self) -> Option<PendingLoad> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }

    /// Drop a queued load
    pub fn dequeue(&mut self, id: TileId) -> Option<PendingLoad> {
        let pos = self.pending.iter().position(|p| p.id == id)?;
        Some(self.pending.remove(pos))
    }

    /// Keep only queued loads for which `keep` holds, then re-sort by distance
    pub fn retain_pending(&mut self, mut keep: impl FnMut(&mut PendingLoad) -> bool) {
        self.pending.retain_mut(|p| keep(p));
        self.pending.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }

    pub fn pending(&self) -> &[PendingLoad] {
        &self.pending
    }

    /// Update access order by moving an id to the end (most recent)
    fn update_access_order(&mut self, id: TileId) {
        self.remove_from_access_order(id);
        self.access_order.push(id);
    }

    /// Remove an id from the access order
    fn remove_from_access_order(&mut self, id: TileId) {
        if let Some(pos) = self.access_order.iter().position(|&c| c == id) {
            self.access_order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use image::RgbImage;

    use crate::heightfield::{Extents, HeightFieldGrid, LinearUnits};
    use crate::streaming::tile::{TileData, TileState};

    fn make_tile(col: u32) -> Tile {
        let mut tile = Tile::pending(TileId::new(col, 0), 0);
        tile.commit(TileData {
            id: tile.id,
            level: 0,
            grid: Arc::new(HeightFieldGrid::new(LinearUnits::Meters, Extents::new(0.0, 1.0, 0.0, 1.0), 0.0, 0.0, 2, 2).unwrap()),
            image: Arc::new(RgbImage::new(1, 1)),
            source_size: (1, 1),
        });
        tile
    }

    #[test]
    fn test_cache_insert_and_get() {
        let mut cache = TileCache::new(10);
        assert!(cache.is_empty());
        cache.insert(make_tile(1), 5);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(TileId::new(1, 0)));
        assert_eq!(cache.get(TileId::new(1, 0)).unwrap().state, TileState::Resident);
        assert_eq!(cache.expiration(TileId::new(1, 0)), Some(5));
    }

    #[test]
    fn test_cache_insert_replace() {
        let mut cache = TileCache::new(10);
        assert!(cache.insert(make_tile(1), 5).is_none());
        let replaced = cache.insert(make_tile(1), 5);
        assert_eq!(replaced.unwrap().id, TileId::new(1, 0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = TileCache::new(3);
        cache.insert(make_tile(1), 5);
        cache.insert(make_tile(2), 5);
        cache.insert(make_tile(3), 5);
        assert!(cache.is_full());

        let evicted = cache.insert(make_tile(4), 5);
        assert_eq!(evicted.unwrap().id, TileId::new(1, 0));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(TileId::new(1, 0)));
        assert_eq!(cache.expiration(TileId::new(1, 0)), None);
    }

    #[test]
    fn test_touch_and_visibility_protect_tiles() {
        let mut cache = TileCache::new(3);
        cache.insert(make_tile(1), 5);
        cache.insert(make_tile(2), 5);
        cache.insert(make_tile(3), 5);

        // 1 was drawn most recently, 2 is visible this frame
        cache.touch(TileId::new(1, 0));
        cache.get_mut(TileId::new(2, 0)).unwrap().visible = true;

        let evicted = cache.insert(make_tile(4), 5);
        assert_eq!(evicted.unwrap().id, TileId::new(3, 0));
        assert!(cache.contains(TileId::new(1, 0)));
        assert!(cache.contains(TileId::new(2, 0)));
    }

    #[test]
    fn test_visible_and_pending_tiles_not_evictable() {
        let mut cache = TileCache::new(2);
        cache.insert(make_tile(1), 5);
        cache.insert(Tile::pending(TileId::new(2, 0), 0), 5);
        cache.get_mut(TileId::new(1, 0)).unwrap().visible = true;
        assert_eq!(cache.oldest_evictable(), None);
        assert!(cache.evict_oldest().is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expiration_counts_down() {
        let mut cache = TileCache::new(4);
        let id = TileId::new(0, 0);
        cache.insert(make_tile(0), 2);
        assert_eq!(cache.tick_expiration(id), 1);
        cache.reset_expiration(id, 2);
        assert_eq!(cache.tick_expiration(id), 1);
        assert_eq!(cache.tick_expiration(id), 0);
        assert_eq!(cache.tick_expiration(id), 0);
        assert_eq!(cache.tick_expiration(TileId::new(9, 9)), 0);
    }

    #[test]
    fn test_pending_queue_nearest_first() {
        let mut cache = TileCache::new(4);
        let load = |col, distance| PendingLoad { id: TileId::new(col, 0), level: 0, distance };
        cache.enqueue(load(1, 30.0));
        cache.enqueue(load(2, 10.0));
        cache.enqueue(load(3, 20.0));
        cache.enqueue(load(1, 5.0));
        assert_eq!(cache.pending().len(), 3);
        assert_eq!(cache.dequeue_nearest().unwrap().id, TileId::new(1, 0));
        assert_eq!(cache.dequeue_nearest().unwrap().id, TileId::new(2, 0));

        cache.retain_pending(|p| {
            p.distance = 1.0;
            p.id != TileId::new(9, 0)
        });
        assert_eq!(cache.dequeue(TileId::new(3, 0)).unwrap().distance, 1.0);
        assert!(cache.dequeue_nearest().is_none());
    }
}
