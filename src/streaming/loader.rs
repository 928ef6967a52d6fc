//! Tile loaders
//!
//! The terrain hands [`LoadRequest`]s to a [`TileLoader`] and collects
//! finished tiles with `poll` at the start of each frame. A result only
//! ever carries a fully decoded [`TileData`], so a tile is either absent or
//! complete from the terrain's point of view.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::core::error::Error;
use crate::core::types::Result;
use super::tile::{TileData, TileId, TileStore};

/// Capacity of the channel carrying decoded tiles back to the terrain
pub const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Request to load one tile at one level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadRequest {
    pub id: TileId,
    pub level: u32,
    pub base_texture_size: u32,
    /// Higher loads first
    pub priority: f32,
}

/// Result of a tile load
#[derive(Debug)]
pub enum LoadResult {
    Loaded(TileData),
    Failed { id: TileId, error: Error },
}

impl LoadResult {
    pub fn id(&self) -> TileId {
        match self {
            LoadResult::Loaded(data) => data.id,
            LoadResult::Failed { id, .. } => *id,
        }
    }
}

/// Backend servicing tile loads for a [`TiledTerrain`](super::TiledTerrain)
pub trait TileLoader: Send {
    /// Queue a load. Returns `false` if the tile is already pending.
    fn request(&mut self, request: LoadRequest) -> bool;

    /// Forget a pending load; a late result for it is discarded
    fn cancel(&mut self, id: TileId);

    /// Completed loads since the last poll (non-blocking)
    fn poll(&mut self) -> Vec<LoadResult>;

    /// Loads requested but not yet returned by `poll`
    fn in_flight(&self) -> usize;

    fn is_pending(&self, id: TileId) -> bool;
}

fn load(store: &TileStore, request: &LoadRequest) -> LoadResult {
    match store.load(request.id, request.level, request.base_texture_size) {
        Ok(data) => LoadResult::Loaded(data),
        Err(error) => LoadResult::Failed { id: request.id, error },
    }
}

/// Decodes on the calling thread when a load is requested.
///
/// Results still surface through `poll`, so the terrain commits them at the
/// same frame checkpoint as with the threaded loader.
pub struct InlineTileLoader {
    store: TileStore,
    ready: Vec<LoadResult>,
}

impl InlineTileLoader {
    pub fn new(store: TileStore) -> Self {
        Self { store, ready: Vec::new() }
    }
}

impl TileLoader for InlineTileLoader {
    fn request(&mut self, request: LoadRequest) -> bool {
        if self.is_pending(request.id) {
            return false;
        }
        self.ready.push(load(&self.store, &request));
        true
    }

    fn cancel(&mut self, id: TileId) {
        self.ready.retain(|r| r.id() != id);
    }

    fn poll(&mut self) -> Vec<LoadResult> {
        std::mem::take(&mut self.ready)
    }

    fn in_flight(&self) -> usize {
        self.ready.len()
    }

    fn is_pending(&self, id: TileId) -> bool {
        self.ready.iter().any(|r| r.id() == id)
    }
}

enum Command {
    Load { ticket: u64, request: LoadRequest },
    Cancel(TileId),
}

struct Completed {
    ticket: u64,
    result: LoadResult,
}

/// Decodes tiles on a dedicated tokio runtime.
///
/// Decoding runs on the blocking pool; finished tiles come back over a
/// bounded channel. Each request carries a ticket so results of cancelled
/// or superseded requests are dropped in `poll`.
pub struct ThreadedTileLoader {
    /// Channel for sending commands to the worker task
    request_tx: mpsc::UnboundedSender<Command>,
    /// Channel for receiving decoded tiles
    result_rx: mpsc::Receiver<Completed>,
    /// Outstanding tickets per tile
    pending: HashMap<TileId, u64>,
    next_ticket: u64,
    runtime: Option<Runtime>,
}

impl ThreadedTileLoader {
    /// Create a loader with its own runtime
    ///
    /// # Arguments
    /// * `store` - Tile set to read from
    /// * `max_concurrent` - Maximum number of decodes running at once
    pub fn new(store: TileStore, max_concurrent: usize) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel::<Command>();
        let (result_tx, result_rx) = mpsc::channel::<Completed>(RESULT_CHANNEL_CAPACITY);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tile-loader")
            .enable_all()
            .build()
            .map_err(|e| Error::Streaming(format!("failed to start loader runtime: {}", e)))?;

        let store = Arc::new(store);
        runtime.spawn(Self::worker_loop(store, max_concurrent.max(1), request_rx, result_tx));

        Ok(Self {
            request_tx,
            result_rx,
            pending: HashMap::new(),
            next_ticket: 0,
            runtime: Some(runtime),
        })
    }

    /// Worker loop that processes load requests with concurrency control
    async fn worker_loop(
        store: Arc<TileStore>,
        max_concurrent: usize,
        mut request_rx: mpsc::UnboundedReceiver<Command>,
        result_tx: mpsc::Sender<Completed>,
    ) {
        let mut active_tasks = JoinSet::new();
        let mut queued: Vec<(u64, LoadRequest)> = Vec::new();
        let mut open = true;

        loop {
            tokio::select! {
                command = request_rx.recv(), if open => match command {
                    Some(Command::Load { ticket, request }) => queued.push((ticket, request)),
                    Some(Command::Cancel(id)) => queued.retain(|(_, r)| r.id != id),
                    None => open = false,
                },

                Some(joined) = active_tasks.join_next(), if !active_tasks.is_empty() => {
                    match joined {
                        Ok(completed) => {
                            // Receiver gone means the loader was dropped
                            if result_tx.send(completed).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::error!("Tile load task failed: {}", e),
                    }
                }

                else => break,
            }

            while active_tasks.len() < max_concurrent && !queued.is_empty() {
                queued.sort_by(|a, b| b.1.priority.total_cmp(&a.1.priority));
                let (ticket, request) = queued.remove(0);
                let store = Arc::clone(&store);
                active_tasks.spawn(async move {
                    let result = match tokio::task::spawn_blocking(move || load(&store, &request)).await {
                        Ok(result) => result,
                        Err(e) => LoadResult::Failed { id: request.id, error: Error::Streaming(e.to_string()) },
                    };
                    Completed { ticket, result }
                });
            }
        }
    }
}

impl TileLoader for ThreadedTileLoader {
    fn request(&mut self, request: LoadRequest) -> bool {
        if self.pending.contains_key(&request.id) {
            return false;
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        if self.request_tx.send(Command::Load { ticket, request }).is_err() {
            log::error!("Tile loader worker is gone; dropping request for {}", request.id);
            return false;
        }
        self.pending.insert(request.id, ticket);
        true
    }

    fn cancel(&mut self, id: TileId) {
        if self.pending.remove(&id).is_some() {
            let _ = self.request_tx.send(Command::Cancel(id));
        }
    }

    fn poll(&mut self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(completed) = self.result_rx.try_recv() {
            let id = completed.result.id();
            if self.pending.get(&id) == Some(&completed.ticket) {
                self.pending.remove(&id);
                results.push(completed.result);
            } else {
                log::debug!("Discarding result of cancelled load for tile {}", id);
            }
        }
        results
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn is_pending(&self, id: TileId) -> bool {
        self.pending.contains_key(&id)
    }
}

impl Drop for ThreadedTileLoader {
    fn drop(&mut self) {
        // Don't wait for decodes still running on the blocking pool
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::heightfield::{Extents, GridSource};
    use crate::streaming::writer::write_tileset;

    fn tileset(dir: &std::path::Path) -> TileStore {
        let extents = Extents::new(0.0, 200.0, 0.0, 100.0);
        let heights = (0..21 * 11).map(|i| (i % 21) as f32).collect();
        let source = GridSource::new(extents, 21, 11, heights);
        let manifest = write_tileset(dir, &source, 2, 1, 11, 16, "LOCAL_CS[\"metre\"]").unwrap();
        TileStore::new(dir, manifest).unwrap()
    }

    fn request(col: u32) -> LoadRequest {
        LoadRequest { id: TileId::new(col, 0), level: 0, base_texture_size: 16, priority: 1.0 }
    }

    fn poll_until(loader: &mut dyn TileLoader, count: usize) -> Vec<LoadResult> {
        let start = Instant::now();
        let mut results = Vec::new();
        while results.len() < count && start.elapsed() < Duration::from_secs(10) {
            results.extend(loader.poll());
            std::thread::sleep(Duration::from_millis(5));
        }
        results
    }

    #[test]
    fn test_inline_loader_hands_over_on_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = InlineTileLoader::new(tileset(dir.path()));
        assert!(loader.request(request(0)));
        assert!(!loader.request(request(0)));
        assert_eq!(loader.in_flight(), 1);

        let results = loader.poll();
        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0], LoadResult::Loaded(d) if d.id == TileId::new(0, 0)));
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn test_inline_cancel_drops_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = InlineTileLoader::new(tileset(dir.path()));
        loader.request(request(0));
        loader.request(request(1));
        loader.cancel(TileId::new(0, 0));
        let results = loader.poll();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), TileId::new(1, 0));
    }

    #[test]
    fn test_missing_tile_fails_locally() {
        let dir = tempfile::tempdir().unwrap();
        let store = tileset(dir.path());
        std::fs::remove_file(TileId::new(1, 0).image_path(dir.path())).unwrap();
        let mut loader = InlineTileLoader::new(store);
        loader.request(request(0));
        loader.request(request(1));
        let results = loader.poll();
        assert!(matches!(&results[0], LoadResult::Loaded(_)));
        assert!(matches!(
            &results[1],
            LoadResult::Failed { error: Error::MissingTileData { col: 1, row: 0, .. }, .. }
        ));
    }

    #[test]
    fn test_threaded_loader_delivers() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ThreadedTileLoader::new(tileset(dir.path()), 2).unwrap();
        assert!(loader.request(request(0)));
        assert!(loader.request(request(1)));
        assert!(!loader.request(request(1)));
        assert!(loader.is_pending(TileId::new(1, 0)));

        let results = poll_until(&mut loader, 2);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, LoadResult::Loaded(_))));
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn test_threaded_cancel_discards_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ThreadedTileLoader::new(tileset(dir.path()), 1).unwrap();
        loader.request(request(0));
        loader.cancel(TileId::new(0, 0));
        assert_eq!(loader.in_flight(), 0);
        loader.request(request(1));

        let results = poll_until(&mut loader, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), TileId::new(1, 0));
        // Anything arriving later for tile 0 is stale
        std::thread::sleep(Duration::from_millis(50));
        assert!(loader.poll().is_empty());
    }
}
