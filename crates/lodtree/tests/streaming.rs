//! End-to-end loading against an in-memory Potree 2 dataset.

use std::collections::HashMap;
use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;
use std::time::Duration;

use glam::DVec3;
use lodtree::tile::TileGeometryBuilder;
use lodtree::{
    Aabb, Action, Arity, ByteRange, Error, FetchFuture, Fetcher, HierarchyLoader, Identity,
    NodeBounds, NodeKey, NodePayload, Phase, PointCloudStreamer, Release, SharedGeometryCache,
    Source, SourceKind, SphereBandBuilder, StreamConfig, Tree, ViewState,
};
use lodtree_decode::hierarchy::potree2::encode_record;
use parking_lot::Mutex;
use serde_json::{Value, json};
use web_time::Instant;

const BASE: &str = "mem://cloud";
const NORMAL: u8 = 0;
const LEAF: u8 = 1;
const PROXY: u8 = 2;

/// Serves files from memory and counts requests per URL.
#[derive(Default)]
struct MemoryFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashMap<String, u16>>,
    requests: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files.lock().insert(format!("{BASE}/{name}"), bytes);
    }

    fn fail(&self, name: &str, status: u16) {
        self.failing.lock().insert(format!("{BASE}/{name}"), status);
    }

    fn heal(&self, name: &str) {
        self.failing.lock().remove(&format!("{BASE}/{name}"));
    }

    fn requests(&self, name: &str) -> usize {
        self.requests
            .lock()
            .get(&format!("{BASE}/{name}"))
            .copied()
            .unwrap_or(0)
    }

    fn serve(&self, url: &str, range: Option<ByteRange>) -> lodtree::Result<Vec<u8>> {
        *self.requests.lock().entry(url.to_string()).or_default() += 1;
        if let Some(&status) = self.failing.lock().get(url) {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        let files = self.files.lock();
        let file = files.get(url).ok_or_else(|| Error::HttpStatus {
            url: url.to_string(),
            status: 404,
        })?;
        let bytes = match range {
            Some(range) => {
                let start = usize::try_from(range.start).unwrap();
                let end = usize::try_from(range.end).unwrap().min(file.len());
                file[start..end].to_vec()
            }
            None => file.clone(),
        };
        Ok(bytes)
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch_range(&self, url: &str, range: Option<ByteRange>) -> FetchFuture<'_, Vec<u8>> {
        let url = url.to_string();
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.serve(&url, range)
        })
    }

    fn fetch_json(&self, url: &str) -> FetchFuture<'_, Value> {
        let url = url.to_string();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let bytes = self.serve(&url, None)?;
            serde_json::from_slice(&bytes).map_err(|e| Error::Json {
                context: "memory fetcher",
                message: e.to_string(),
            })
        })
    }
}

fn point(x: i32, y: i32, z: i32) -> Vec<u8> {
    [x, y, z].iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A root with a leaf in octant 0 and a proxy in octant 7. The proxy's
/// chunk sits after the first chunk in `hierarchy.bin`.
fn dataset() -> Arc<MemoryFetcher> {
    let fetcher = Arc::new(MemoryFetcher::default());

    let metadata = json!({
        "version": "2.0",
        "hierarchy": { "firstChunkSize": 66, "stepSize": 4, "depth": 2 },
        "boundingBox": { "min": [0.0, 0.0, 0.0], "max": [8.0, 8.0, 8.0] },
        "scale": [0.001, 0.001, 0.001],
        "offset": [0.0, 0.0, 0.0],
        "spacing": 1.0,
        "encoding": "DEFAULT",
        "attributes": [{ "name": "position", "size": 12 }]
    });
    fetcher.insert("metadata.json", serde_json::to_vec(&metadata).unwrap());

    let mut hierarchy = Vec::new();
    hierarchy.extend(encode_record(NORMAL, 0b1000_0001, 2, 0, 24));
    hierarchy.extend(encode_record(LEAF, 0, 1, 24, 12));
    hierarchy.extend(encode_record(PROXY, 0, 0, 66, 22));
    hierarchy.extend(encode_record(LEAF, 0, 1, 36, 12));
    fetcher.insert("hierarchy.bin", hierarchy);

    let mut octree = Vec::new();
    octree.extend(point(1000, 2000, 3000));
    octree.extend(point(7000, 6000, 5000));
    octree.extend(point(500, 500, 500));
    octree.extend(point(7500, 7500, 7500));
    fetcher.insert("octree.bin", octree);

    fetcher
}

async fn open(fetcher: &Arc<MemoryFetcher>) -> HierarchyLoader {
    let source = Source::new(SourceKind::Potree2, BASE);
    let dataset = source
        .open(fetcher.as_ref(), Arc::new(Identity))
        .await
        .unwrap();
    let fetcher: Arc<dyn Fetcher> = fetcher.clone();
    HierarchyLoader::new(fetcher, dataset.format, dataset.tree)
}

fn keys(tree: &Tree) -> Vec<(NodeKey, Vec<NodeKey>)> {
    let mut keys: Vec<_> = tree
        .iter()
        .map(|(_, node)| {
            let children = node
                .children()
                .iter()
                .map(|&c| tree.get(c).unwrap().key())
                .collect();
            (node.key(), children)
        })
        .collect();
    keys.sort_by_key(|(key, _)| *key);
    keys
}

#[tokio::test]
async fn test_open_starts_with_unloaded_root() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let tree = loader.tree().lock();
    let root = tree.get(tree.root()).unwrap();
    assert_eq!(tree.len(), 1);
    assert!(!root.octree_is_loaded());
    assert_eq!(root.count(), -1);
    assert_eq!(root.page(), Some(ByteRange::new(0, 66)));
    assert_eq!(fetcher.requests("metadata.json"), 1);
}

#[tokio::test]
async fn test_concurrent_hierarchy_loads_share_one_fetch() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let root = loader.tree().lock().root();

    let results = futures::future::join_all((0..8).map(|_| loader.load_hierarchy(root))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(fetcher.requests("hierarchy.bin"), 1);
    assert_eq!(loader.in_flight(), 0);

    let tree = loader.tree().lock();
    let node = tree.get(root).unwrap();
    assert!(node.octree_is_loaded());
    assert_eq!(node.count(), 2);
    let children: Vec<_> = node
        .children()
        .iter()
        .map(|&c| tree.get(c).unwrap().key())
        .collect();
    assert_eq!(children, vec![NodeKey::ROOT.child(0), NodeKey::ROOT.child(7)]);

    let proxy = tree.get(tree.find(NodeKey::ROOT.child(7)).unwrap()).unwrap();
    assert!(!proxy.octree_is_loaded());
    assert_eq!(proxy.page(), Some(ByteRange::new(66, 22)));
}

#[tokio::test]
async fn test_proxy_loads_its_own_chunk() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let root = loader.tree().lock().root();
    loader.load_hierarchy(root).await.unwrap();

    let proxy = loader.tree().lock().find(NodeKey::ROOT.child(7)).unwrap();
    loader.load_hierarchy(proxy).await.unwrap();
    // Already loaded nodes resolve without a fetch.
    loader.load_hierarchy(proxy).await.unwrap();

    let tree = loader.tree().lock();
    let node = tree.get(proxy).unwrap();
    assert!(node.octree_is_loaded());
    assert_eq!(node.count(), 1);
    assert_eq!(fetcher.requests("hierarchy.bin"), 2);
}

#[tokio::test]
async fn test_tree_shape_is_deterministic() {
    let mut shapes = Vec::new();
    for _ in 0..2 {
        let fetcher = dataset();
        let loader = open(&fetcher).await;
        let root = loader.tree().lock().root();
        loader.load_hierarchy(root).await.unwrap();
        let proxy = loader.tree().lock().find(NodeKey::ROOT.child(7)).unwrap();
        loader.load_hierarchy(proxy).await.unwrap();
        shapes.push(keys(&loader.tree().lock()));
    }
    assert_eq!(shapes[0], shapes[1]);
}

#[tokio::test]
async fn test_corrupt_chunk_can_be_retried() {
    let fetcher = dataset();
    let good = fetcher.files.lock()[&format!("{BASE}/hierarchy.bin")].clone();
    fetcher.insert("hierarchy.bin", good[..30].to_vec());

    let loader = open(&fetcher).await;
    let root = loader.tree().lock().root();
    let error = loader.load_hierarchy(root).await.unwrap_err();
    assert!(matches!(error, Error::Decode(_)));
    assert!(!loader.is_definitive(&error));
    assert!(!loader.tree().lock().get(root).unwrap().octree_is_loaded());
    assert_eq!(loader.tree().lock().len(), 1);

    fetcher.insert("hierarchy.bin", good);
    loader.load_hierarchy(root).await.unwrap();
    assert_eq!(loader.tree().lock().len(), 3);
}

#[tokio::test]
async fn test_points_widen_vertical_bounds() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let root = loader.tree().lock().root();

    let points = loader.load_points(root).await.unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points.origin, DVec3::splat(4.0));
    assert!((points.min_z - 3.0).abs() < 1e-9);
    assert!((points.max_z - 5.0).abs() < 1e-9);
    assert_eq!(fetcher.requests("octree.bin"), 1);

    // Attached points are served from the tree.
    loader.load_points(root).await.unwrap();
    assert_eq!(fetcher.requests("octree.bin"), 1);
}

#[tokio::test]
async fn test_streamer_fetches_hierarchy_then_level() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let mut streamer = PointCloudStreamer::new(loader, 1.0, &StreamConfig::default());
    let root = streamer.loader().tree().lock().root();
    // Camera inside the dataset wants every level.
    let view = ViewState::new(DVec3::splat(4.0), FRAC_PI_2, 1080.0);
    let now = Instant::now();

    assert_eq!(streamer.step(root, &view, now).await.unwrap(), Action::FetchHierarchy);
    assert_eq!(streamer.step(root, &view, now).await.unwrap(), Action::FetchLevel(0));
    assert_eq!(streamer.points(root).unwrap().len(), 2);
    assert_eq!(streamer.step(root, &view, now).await.unwrap(), Action::None);

    let proxy = streamer.loader().tree().lock().find(NodeKey::ROOT.child(7)).unwrap();
    assert_eq!(streamer.step(proxy, &view, now).await.unwrap(), Action::FetchHierarchy);
    assert_eq!(streamer.step(proxy, &view, now).await.unwrap(), Action::FetchLevel(1));
    assert_eq!(streamer.points(proxy).unwrap().len(), 1);
}

#[tokio::test]
async fn test_streamer_backs_off_after_transient_failure() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let mut streamer = PointCloudStreamer::new(loader, 1.0, &StreamConfig::default());
    let root = streamer.loader().tree().lock().root();
    let view = ViewState::new(DVec3::splat(4.0), FRAC_PI_2, 1080.0);
    let t0 = Instant::now();

    streamer.step(root, &view, t0).await.unwrap();
    fetcher.fail("octree.bin", 503);
    assert!(streamer.step(root, &view, t0).await.is_err());
    assert_eq!(
        streamer.layer().state(NodeKey::ROOT).unwrap().phase(),
        Phase::Error
    );

    fetcher.heal("octree.bin");
    assert_eq!(streamer.step(root, &view, t0).await.unwrap(), Action::None);
    assert_eq!(fetcher.requests("octree.bin"), 1);

    let t1 = t0 + Duration::from_secs(1);
    assert_eq!(streamer.step(root, &view, t1).await.unwrap(), Action::FetchLevel(0));
    assert_eq!(fetcher.requests("octree.bin"), 2);
}

#[tokio::test]
async fn test_missing_payload_is_never_retried() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let mut streamer = PointCloudStreamer::new(loader, 1.0, &StreamConfig::default());
    let root = streamer.loader().tree().lock().root();
    let view = ViewState::new(DVec3::splat(4.0), FRAC_PI_2, 1080.0);
    let t0 = Instant::now();

    streamer.step(root, &view, t0).await.unwrap();
    fetcher.fail("octree.bin", 404);
    assert!(streamer.step(root, &view, t0).await.is_err());

    let later = t0 + Duration::from_secs(3600);
    assert_eq!(streamer.step(root, &view, later).await.unwrap(), Action::None);
    assert_eq!(
        streamer.layer().state(NodeKey::ROOT).unwrap().phase(),
        Phase::DefinitiveError
    );
}

#[tokio::test]
async fn test_prune_forgets_subtree() {
    let fetcher = dataset();
    let loader = open(&fetcher).await;
    let mut streamer = PointCloudStreamer::new(loader, 1.0, &StreamConfig::default());
    let root = streamer.loader().tree().lock().root();
    let view = ViewState::new(DVec3::splat(4.0), FRAC_PI_2, 1080.0);
    let now = Instant::now();

    streamer.step(root, &view, now).await.unwrap();
    let proxy = streamer.loader().tree().lock().find(NodeKey::ROOT.child(7)).unwrap();
    streamer.step(proxy, &view, now).await.unwrap();
    streamer.step(proxy, &view, now).await.unwrap();

    let payloads = streamer.prune(proxy).unwrap();
    assert_eq!(payloads.len(), 1);
    assert!(streamer.layer().state(NodeKey::ROOT.child(7)).is_none());
    assert!(streamer.loader().tree().lock().find(NodeKey::ROOT.child(7)).is_none());
    assert!(streamer.prune(root).is_err());
}

#[tokio::test]
async fn test_quadtree_tiles_share_band_geometry() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    // Natural coordinates are (longitude, latitude, height) in radians.
    let natural = Aabb::new(
        DVec3::new(0.0, -FRAC_PI_2, 0.0),
        DVec3::new(2.0 * FRAC_PI_2, FRAC_PI_2, 0.0),
    );
    let mut tree = Tree::new(Arity::Quad, NodeBounds::new(natural, |p| p), Arc::new(Identity));
    let cache = Arc::new(SharedGeometryCache::new(8));
    let tiles = TileGeometryBuilder::new(SphereBandBuilder, 1.0, Arc::clone(&cache));

    let children = tree.subdivide(tree.root()).unwrap();
    assert_eq!(children.len(), 4);
    for &child in &children {
        let bounds = *tree.get(child).unwrap().bounds();
        let mesh = tiles.build(&bounds, 8).await.unwrap();
        tree.attach_payload(child, NodePayload::Tile(mesh)).unwrap();
    }
    // Two latitude bands, each shared by two tiles.
    assert_eq!(cache.len(), 2);

    let mut released = Vec::new();
    for child in children {
        for payload in tree.prune(child).unwrap() {
            if let NodePayload::Tile(mesh) = payload {
                released.push(tiles.release(&mesh));
            }
        }
    }
    assert_eq!(released.iter().filter(|r| **r == Release::Disposed).count(), 2);
    assert!(cache.is_empty());
    assert_eq!(tree.len(), 1);
}
