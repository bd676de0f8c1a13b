//! Label content registry and content resolution
//!
//! Each label can carry up to three short texts, three images and three
//! videos. Entries are keyed by label name and read from a TOML file:
//!
//! ```toml
//! [labels.jordan]
//! texts = ["Number 23", "Red or white uniform"]
//! images = ["https://example.com/jordan.jpg"]
//! videos = ["https://www.youtube.com/watch?v=LLo8BEHmPs4"]
//! ```
//!
//! A label with no entry resolves to empty content, never an error.

use crate::label::Label;
use crate::media;
use lablens_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Maximum items shown per category
pub const MAX_ITEMS_PER_CATEGORY: usize = 3;

/// Registry compiled into the binary, used when no content file is configured
const BUILTIN_CONTENT: &str = include_str!("../content.toml");

/// Content defined for one label
///
/// Images and videos are URLs or inline `data:` URIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentEntry {
    pub texts: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

/// On-disk registry layout
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistryFile {
    labels: HashMap<Label, ContentEntry>,
}

/// A video reference plus its thumbnail, when one can be derived
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoItem {
    pub url: String,
    /// None means the UI shows a plain link instead of a thumbnail
    pub thumbnail: Option<String>,
}

/// Display payload for one label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedContent {
    pub label: Label,
    pub texts: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<VideoItem>,
}

impl ResolvedContent {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty() && self.videos.is_empty()
    }
}

/// Static label → content mapping
#[derive(Debug, Clone, Default)]
pub struct LabelContentRegistry {
    entries: HashMap<Label, ContentEntry>,
}

impl LabelContentRegistry {
    pub fn new(entries: HashMap<Label, ContentEntry>) -> Self {
        Self { entries }
    }

    /// The sample registry shipped with the binary
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_CONTENT).unwrap_or_else(|e| {
            warn!("Built-in content registry is invalid, starting empty: {}", e);
            Self::default()
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse content registry failed: {}", e)))?;

        for (label, entry) in &file.labels {
            if entry.texts.len() > MAX_ITEMS_PER_CATEGORY
                || entry.images.len() > MAX_ITEMS_PER_CATEGORY
                || entry.videos.len() > MAX_ITEMS_PER_CATEGORY
            {
                debug!(
                    label = %label,
                    "Content entry has more than {} items in a category; extras are not shown",
                    MAX_ITEMS_PER_CATEGORY
                );
            }
        }

        Ok(Self::new(file.labels))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read content registry {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&ContentEntry> {
        self.entries.get(label)
    }

    /// Registry keys that are not part of the given vocabulary, sorted
    ///
    /// These entries can never be shown; usually a typo in the content file.
    pub fn unknown_labels(&self, vocabulary: &[Label]) -> Vec<&Label> {
        let mut unknown: Vec<&Label> = self
            .entries
            .keys()
            .filter(|label| !vocabulary.contains(label))
            .collect();
        unknown.sort();
        unknown
    }

    /// Bounded display payload for a label
    ///
    /// Each category keeps registry order, drops blank strings and is cut
    /// to the first three items.
    pub fn resolve(&self, label: &str) -> ResolvedContent {
        let entry = self.entries.get(label);
        let pick = |items: Option<&Vec<String>>| -> Vec<String> {
            items
                .map(|items| pick_top(items))
                .unwrap_or_default()
        };

        let videos = pick(entry.map(|e| &e.videos))
            .into_iter()
            .map(|url| VideoItem {
                thumbnail: media::derive_thumbnail(&url),
                url,
            })
            .collect();

        ResolvedContent {
            label: Label::from(label),
            texts: pick(entry.map(|e| &e.texts)),
            images: pick(entry.map(|e| &e.images)),
            videos,
        }
    }
}

fn pick_top(items: &[String]) -> Vec<String> {
    items
        .iter()
        .filter(|item| !item.trim().is_empty())
        .take(MAX_ITEMS_PER_CATEGORY)
        .cloned()
        .collect()
}
