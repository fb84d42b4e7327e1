// src/tags/mod.rs

//! Tag handling: normalisation, validation against the set of known active
//! tags, and building the runner's filter expression.
//!
//! Exclude tags are normalised and recorded on the execution, but
//! [`build_expression`] only ever sees include tags. Composing `not @tag`
//! terms is not implemented.

pub mod expression;

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::catalog::FeatureCatalog;
use crate::errors::Result;
use crate::fs::FileSystem;

pub use expression::build_expression;

/// Trim, lower-case and `@`-prefix a raw tag. Blank input yields `None`.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "@" {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with('@') {
        Some(lower)
    } else {
        Some(format!("@{lower}"))
    }
}

/// Normalise a list of raw tags, dropping blanks and duplicates while
/// keeping first-seen order.
pub fn normalize_all<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .filter_map(|t| normalize_tag(t.as_ref()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Collaborator that filters requested tags down to known, active ones.
pub trait TagValidator: Send + Sync {
    /// Returns the normalised tags that are known and active, in request
    /// order, without duplicates. Unknown tags are dropped, not errors.
    fn validate(&self, requested: &[String]) -> Vec<String>;
}

/// Entry of the tags file (`[{"name": "@smoke", "active": true}, ...]`).
#[derive(Debug, Clone, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// Set of active tag names.
#[derive(Debug, Clone, Default)]
pub struct KnownTags {
    active: BTreeSet<String>,
}

impl KnownTags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            active: tags
                .into_iter()
                .filter_map(|t| normalize_tag(t.as_ref()))
                .collect(),
        }
    }

    /// Load active tags from a JSON tags file.
    pub fn from_json_file(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let contents = fs.read_to_string(path)?;
        let entries: Vec<TagEntry> = serde_json::from_str(&contents)?;
        let total = entries.len();
        let known = Self::new(entries.into_iter().filter(|e| e.active).map(|e| e.name));
        debug!(path = %path.display(), total, active = known.len(), "loaded tags file");
        Ok(known)
    }

    /// Every tag that appears in some feature file counts as active.
    pub fn from_catalog(catalog: &dyn FeatureCatalog) -> Result<Self> {
        Ok(Self::new(catalog.all_tags()?))
    }

    /// Tags file when present, otherwise the tags found in the catalog.
    pub fn load(fs: &dyn FileSystem, tags_file: &Path, catalog: &dyn FeatureCatalog) -> Result<Self> {
        if fs.is_file(tags_file) {
            Self::from_json_file(fs, tags_file)
        } else {
            debug!(
                path = %tags_file.display(),
                "no tags file; treating every catalog tag as active"
            );
            Self::from_catalog(catalog)
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        normalize_tag(tag).is_some_and(|t| self.active.contains(&t))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl TagValidator for KnownTags {
    fn validate(&self, requested: &[String]) -> Vec<String> {
        normalize_all(requested)
            .into_iter()
            .filter(|tag| {
                let known = self.active.contains(tag);
                if !known {
                    warn!(tag = %tag, "tag not found or inactive; ignoring");
                }
                known
            })
            .collect()
    }
}
