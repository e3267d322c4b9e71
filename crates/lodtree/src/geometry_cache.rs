//! Reference-counted cache of GPU-ready geometry.
//!
//! Nodes with the same shape (for example terrain tiles in the same latitude
//! band) share one set of buffers. Entries are keyed by a signature string
//! and built at most once: the first caller reserves the slot and every
//! concurrent caller awaits the same build, success or failure.
//!
//! Owners call [`SharedGeometryCache::increase_ref_count`] before attaching
//! a geometry and [`SharedGeometryCache::release`] when detaching it. The
//! buffers are disposed exactly when the count drops from positive to zero.
//! The LRU only decides whether an entry can still be found: a referenced
//! entry pushed out by capacity stays alive until its last release. An entry
//! that is neither findable nor referenced is disposed when its last handle
//! is dropped.

use std::future::Future;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Default number of signatures kept findable.
pub const DEFAULT_CAPACITY: usize = 512;

/// A GPU resource with an explicit release.
pub trait Disposable: Send + Sync + 'static {
    /// Free the underlying resources. Called at most once per cache entry.
    fn dispose(&self);
}

type BuildFuture<G> = Shared<BoxFuture<'static, Result<Arc<G>>>>;

#[derive(Debug, Default)]
struct RefCount {
    /// `None` until the build first completes.
    count: Option<u32>,
    disposed: bool,
}

struct Slot<G> {
    signature: String,
    build: BuildFuture<G>,
    refs: Mutex<RefCount>,
    dispose: fn(&G),
}

impl<G> Slot<G> {
    fn dispose(&self) {
        if let Some(Ok(geometry)) = self.build.peek() {
            (self.dispose)(geometry);
        }
    }
}

impl<G> Drop for Slot<G> {
    fn drop(&mut self) {
        let refs = self.refs.get_mut();
        if refs.disposed {
            return;
        }
        refs.disposed = true;
        if self.build.peek().is_some_and(Result::is_ok) {
            tracing::debug!(signature = %self.signature, "disposed geometry with no handles left");
            self.dispose();
        }
    }
}

/// Handle to a cache slot, used for reference counting.
pub struct CacheEntry<G>(Arc<Slot<G>>);

impl<G> Clone for CacheEntry<G> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<G> std::fmt::Debug for CacheEntry<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("signature", &self.0.signature)
            .field("refs", &*self.0.refs.lock())
            .finish()
    }
}

impl<G> CacheEntry<G> {
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.0.signature
    }

    /// Current reference count, `None` while tracking is uninitialized.
    #[must_use]
    pub fn ref_count(&self) -> Option<u32> {
        self.0.refs.lock().count
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.0.refs.lock().disposed
    }

    /// Whether two handles refer to the same slot.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A built geometry together with the entry that owns it.
pub struct CachedGeometry<G> {
    entry: CacheEntry<G>,
    geometry: Arc<G>,
}

impl<G> Clone for CachedGeometry<G> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            geometry: Arc::clone(&self.geometry),
        }
    }
}

impl<G> std::fmt::Debug for CachedGeometry<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedGeometry")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl<G> CachedGeometry<G> {
    #[must_use]
    pub fn entry(&self) -> &CacheEntry<G> {
        &self.entry
    }

    #[must_use]
    pub fn geometry(&self) -> &Arc<G> {
        &self.geometry
    }
}

impl<G> Deref for CachedGeometry<G> {
    type Target = G;

    fn deref(&self) -> &G {
        &self.geometry
    }
}

/// Outcome of [`SharedGeometryCache::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other owners remain.
    Retained(u32),
    /// This was the last owner; the geometry was disposed.
    Disposed,
    /// The count was already zero. Nothing changed; the caller released
    /// more often than it acquired.
    Underflow,
}

/// LRU of shared, reference-counted geometry.
pub struct SharedGeometryCache<G> {
    slots: Mutex<LruCache<String, Arc<Slot<G>>>>,
}

impl<G: Disposable> Default for SharedGeometryCache<G> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<G: Disposable> SharedGeometryCache<G> {
    /// Create a cache keeping at most `capacity` signatures findable.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of findable signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, signature: &str) -> bool {
        self.slots.lock().contains(signature)
    }

    /// Look up a reserved slot without building anything.
    #[must_use]
    pub fn entry(&self, signature: &str) -> Option<CacheEntry<G>> {
        self.slots
            .lock()
            .peek(signature)
            .map(|slot| CacheEntry(Arc::clone(slot)))
    }

    /// Return the geometry for `signature`, building it with `builder` if no
    /// slot exists.
    ///
    /// The slot is reserved before the first suspension point, so concurrent
    /// callers share a single build. A failed build is handed to every
    /// waiting caller and its slot is dropped so a later call can retry.
    pub async fn get_or_build<F, Fut>(&self, signature: &str, builder: F) -> Result<CachedGeometry<G>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<G>> + Send + 'static,
    {
        let slot = self.reserve(signature, builder);

        match slot.build.clone().await {
            Ok(geometry) => {
                let mut refs = slot.refs.lock();
                if refs.count.is_none() && !refs.disposed {
                    refs.count = Some(0);
                }
                drop(refs);
                Ok(CachedGeometry {
                    entry: CacheEntry(slot),
                    geometry,
                })
            }
            Err(e) => {
                tracing::warn!(signature, error = %e, "geometry build failed");
                self.unlink(&slot);
                Err(e)
            }
        }
    }

    fn reserve<F, Fut>(&self, signature: &str, builder: F) -> Arc<Slot<G>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<G>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(signature) {
            tracing::debug!(signature, "geometry cache hit");
            return Arc::clone(slot);
        }

        tracing::debug!(signature, "building geometry");
        let build = builder().map(|result| result.map(Arc::new)).boxed().shared();
        let slot = Arc::new(Slot {
            signature: signature.to_string(),
            build,
            refs: Mutex::new(RefCount::default()),
            dispose: <G as Disposable>::dispose,
        });

        if let Some((evicted_signature, evicted)) =
            slots.push(signature.to_string(), Arc::clone(&slot))
        {
            if evicted_signature != signature {
                Self::on_evicted(&evicted);
            }
        }
        slot
    }

    /// Capacity eviction only unlinks. Unreferenced geometry has no owner
    /// left to release it, so it is disposed here. Anything else is disposed
    /// by its last release, or when its last handle drops.
    fn on_evicted(slot: &Slot<G>) {
        let mut refs = slot.refs.lock();
        match refs.count {
            Some(0) if !refs.disposed => {
                refs.disposed = true;
                drop(refs);
                tracing::debug!(signature = %slot.signature, "evicted unreferenced geometry");
                slot.dispose();
            }
            count => {
                tracing::debug!(
                    signature = %slot.signature,
                    ?count,
                    "evicted referenced geometry, disposal deferred"
                );
            }
        }
    }

    fn unlink(&self, slot: &Arc<Slot<G>>) {
        let mut slots = self.slots.lock();
        if slots
            .peek(&slot.signature)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.pop(&slot.signature);
        }
    }

    /// Count one more owner of `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logic`] if the entry's build has not completed yet
    /// (its count is uninitialized) or the entry was already disposed.
    pub fn increase_ref_count(&self, entry: &CacheEntry<G>) -> Result<u32> {
        let mut refs = entry.0.refs.lock();
        if refs.disposed {
            return Err(Error::Logic {
                detail: format!("geometry '{}' was already disposed", entry.0.signature),
            });
        }
        let Some(count) = refs.count.as_mut() else {
            return Err(Error::Logic {
                detail: format!(
                    "reference count of geometry '{}' is not initialized",
                    entry.0.signature
                ),
            });
        };
        *count += 1;
        Ok(*count)
    }

    /// Drop one owner of `entry`, disposing it when none remain.
    pub fn release(&self, entry: &CacheEntry<G>) -> Release {
        let mut refs = entry.0.refs.lock();
        match refs.count {
            Some(count) if count > 1 => {
                refs.count = Some(count - 1);
                Release::Retained(count - 1)
            }
            Some(1) => {
                refs.count = Some(0);
                refs.disposed = true;
                drop(refs);
                entry.0.dispose();
                self.unlink(&entry.0);
                tracing::debug!(signature = %entry.0.signature, "disposed geometry");
                Release::Disposed
            }
            _ => {
                tracing::warn!(
                    signature = %entry.0.signature,
                    "released geometry with no owners"
                );
                Release::Underflow
            }
        }
    }
}
