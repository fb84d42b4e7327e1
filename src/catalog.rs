// src/catalog.rs

//! Feature catalog collaborator: which feature files exist and which of
//! them carry a given tag selection.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::types::TagLogic;

/// File extension of Gherkin feature files.
pub const FEATURE_EXTENSION: &str = "feature";

/// Read-only view of the available feature files.
pub trait FeatureCatalog: Send + Sync {
    /// All feature identifiers (file names), sorted.
    fn all_features(&self) -> Result<Vec<String>>;

    /// Features whose tags satisfy `tags` under `logic`, sorted.
    ///
    /// `AND`: the feature carries every tag. `OR`: it carries at least one.
    /// Comparison is case-insensitive.
    fn features_matching(&self, tags: &[String], logic: TagLogic) -> Result<Vec<String>>;

    fn contains(&self, feature: &str) -> Result<bool> {
        Ok(self.all_features()?.iter().any(|f| f == feature))
    }

    /// Every distinct tag used by any feature, lower-cased.
    fn all_tags(&self) -> Result<Vec<String>>;
}

/// Catalog backed by a directory of `.feature` files.
#[derive(Debug, Clone)]
pub struct FsFeatureCatalog {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl FsFeatureCatalog {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn feature_paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self.fs.files_with_extension(&self.dir, FEATURE_EXTENSION)?)
    }

    /// `(file name, tags)` for every feature; unreadable files are skipped.
    fn tagged_features(&self) -> Result<Vec<(String, Vec<String>)>> {
        let mut out = Vec::new();
        for path in self.feature_paths()? {
            let Some(name) = file_name(&path) else {
                continue;
            };
            match self.fs.read_to_string(&path) {
                Ok(contents) => out.push((name, extract_tags(&contents))),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read feature file; skipping");
                }
            }
        }
        Ok(out)
    }
}

impl FeatureCatalog for FsFeatureCatalog {
    fn all_features(&self) -> Result<Vec<String>> {
        Ok(self
            .feature_paths()?
            .iter()
            .filter_map(|p| file_name(p))
            .collect())
    }

    fn features_matching(&self, tags: &[String], logic: TagLogic) -> Result<Vec<String>> {
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();

        let matches: Vec<String> = self
            .tagged_features()?
            .into_iter()
            .filter(|(_, feature_tags)| match logic {
                TagLogic::And => wanted.iter().all(|t| feature_tags.contains(t)),
                TagLogic::Or => wanted.iter().any(|t| feature_tags.contains(t)),
            })
            .map(|(name, _)| name)
            .collect();

        debug!(?wanted, %logic, matched = matches.len(), "filtered features by tags");
        Ok(matches)
    }

    fn all_tags(&self) -> Result<Vec<String>> {
        let tags: BTreeSet<String> = self
            .tagged_features()?
            .into_iter()
            .flat_map(|(_, tags)| tags)
            .collect();
        Ok(tags.into_iter().collect())
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// Collect the `@tag` tokens from a Gherkin document (feature and scenario
/// level), lower-cased and de-duplicated in first-seen order.
pub fn extract_tags(contents: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut tags = Vec::new();

    for line in contents.lines() {
        let line = line.trim();
        if !line.starts_with('@') {
            continue;
        }
        // Trailing comments are allowed on tag lines.
        let line = line.split(" #").next().unwrap_or(line);
        for token in line.split_whitespace() {
            if token.starts_with('@') && token.len() > 1 {
                let tag = token.to_lowercase();
                if seen.insert(tag.clone()) {
                    tags.push(tag);
                }
            }
        }
    }

    tags
}
