//! Dataset discovery and root instantiation.

use std::sync::Arc;

use lodtree_decode::NodeBounds;
use serde::Deserialize;
use serde_json::Value;

use crate::crs::CrsTransform;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::format::{Ept, HierarchyFormat, Potree, Potree2, RootDescriptor};
use crate::tree::Tree;

/// Hierarchy layout of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Clustered octree with a side `hierarchy.bin`.
    Potree2,
    /// Paged binary `.hrc` hierarchy.
    Potree,
    /// Flat JSON hierarchy documents.
    Ept,
}

impl SourceKind {
    /// File name of the dataset's metadata document.
    #[must_use]
    pub fn metadata_file(self) -> &'static str {
        match self {
            SourceKind::Potree2 => "metadata.json",
            SourceKind::Potree => "cloud.js",
            SourceKind::Ept => "ept.json",
        }
    }

    /// Guess the kind from the metadata URL.
    #[must_use]
    pub fn detect(url: &str) -> Option<Self> {
        let file = url.rsplit('/').next()?;
        [SourceKind::Potree2, SourceKind::Potree, SourceKind::Ept]
            .into_iter()
            .find(|kind| kind.metadata_file() == file)
    }
}

/// A tree ready to load, together with the format that feeds it.
pub struct Dataset {
    pub tree: Tree,
    pub format: Arc<dyn HierarchyFormat>,
    /// Point spacing at the root level.
    pub spacing: f64,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("tree", &self.tree)
            .field("format", &self.format.name())
            .field("spacing", &self.spacing)
            .finish()
    }
}

/// A remote dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    kind: SourceKind,
    base_url: String,
}

impl Source {
    #[must_use]
    pub fn new(kind: SourceKind, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
        }
    }

    /// Create a source from the URL of its metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSource`] if the file name is not a known
    /// metadata document.
    pub fn from_metadata_url(url: &str) -> Result<Self> {
        let kind = SourceKind::detect(url)
            .ok_or_else(|| Error::malformed(format!("unrecognized dataset url {url}")))?;
        let base_url = url.rsplit_once('/').map_or("", |(base, _)| base);
        Ok(Self::new(kind, base_url))
    }

    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    #[must_use]
    pub fn metadata_url(&self) -> String {
        crate::format::join_url(&self.base_url, self.kind.metadata_file())
    }

    /// Build the format and an unloaded root from a metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSource`] if the document is missing, lacks a
    /// required field, or names an unsupported encoding.
    pub fn instantiate_root(&self, metadata: &Value, crs: Arc<dyn CrsTransform>) -> Result<Dataset> {
        let (format, root): (Arc<dyn HierarchyFormat>, RootDescriptor) = match self.kind {
            SourceKind::Potree2 => {
                let (format, root) = Potree2::from_metadata(&self.base_url, metadata)?;
                (Arc::new(format), root)
            }
            SourceKind::Potree => {
                let (format, root) = Potree::from_metadata(&self.base_url, metadata)?;
                (Arc::new(format), root)
            }
            SourceKind::Ept => {
                let (format, root) = Ept::from_metadata(&self.base_url, metadata)?;
                (Arc::new(format), root)
            }
        };

        if !(root.natural.min.is_finite() && root.natural.max.is_finite())
            || root.natural.min.cmpgt(root.natural.max).any()
        {
            return Err(Error::malformed("dataset bounding box is empty or not finite"));
        }

        let bounds = NodeBounds::new(root.natural, |p| crs.to_world(p));
        let mut tree = Tree::new(format.arity(), bounds, crs);
        if let Some(page) = root.page {
            tree = tree.with_root_page(page);
        }
        tracing::info!(
            format = format.name(),
            url = %self.base_url,
            spacing = root.spacing,
            "instantiated dataset root"
        );
        Ok(Dataset {
            tree,
            format,
            spacing: root.spacing,
        })
    }

    /// Fetch the metadata document and instantiate the root.
    ///
    /// # Errors
    ///
    /// Returns the fetch error or any error of
    /// [`instantiate_root`](Self::instantiate_root).
    pub async fn open(&self, fetcher: &dyn Fetcher, crs: Arc<dyn CrsTransform>) -> Result<Dataset> {
        let url = self.metadata_url();
        let metadata = fetcher.fetch_json(&url).await?;
        self.instantiate_root(&metadata, crs)
    }
}
