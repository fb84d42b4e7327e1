// src/engine/plan.rs

//! Request validation and feature selection.
//!
//! Planning is synchronous and side-effect free: it turns a [`RunRequest`]
//! into either a launch [`Selection`] or a skip, or rejects the request with
//! a `ValidationError` before anything is started.

use tracing::{debug, info, warn};

use crate::catalog::{FEATURE_EXTENSION, FeatureCatalog};
use crate::errors::{BddrunError, Result};
use crate::exec::RunnerFilter;
use crate::record::ExecutionRecord;
use crate::tags::{TagValidator, build_expression, normalize_all};
use crate::types::{ExecutionType, TagLogic};

/// Everything a caller can ask for when starting a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub execution_type: ExecutionType,
    pub feature_files: Vec<String>,
    pub tags: Vec<String>,
    pub tag_logic: TagLogic,
    pub exclude_tags: Vec<String>,
    /// Caller-chosen id; generated when `None`.
    pub execution_id: Option<String>,
}

impl RunRequest {
    fn of(execution_type: ExecutionType) -> Self {
        Self {
            execution_type,
            feature_files: Vec::new(),
            tags: Vec::new(),
            tag_logic: TagLogic::And,
            exclude_tags: Vec::new(),
            execution_id: None,
        }
    }

    pub fn all() -> Self {
        Self::of(ExecutionType::All)
    }

    pub fn features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            feature_files: features.into_iter().map(Into::into).collect(),
            ..Self::of(ExecutionType::Feature)
        }
    }

    pub fn tags<I, S>(tags: I, logic: TagLogic) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            tag_logic: logic,
            ..Self::of(ExecutionType::TagBased)
        }
    }

    /// Include tags plus exclude tags. Include tags are always combined
    /// with `AND`.
    pub fn complex<I, J, S, T>(include: I, exclude: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            tags: include.into_iter().map(Into::into).collect(),
            exclude_tags: exclude.into_iter().map(Into::into).collect(),
            ..Self::of(ExecutionType::ComplexTag)
        }
    }

    pub fn with_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }
}

/// What will be run, plus the selection fields recorded on the execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub execution_type: ExecutionType,
    pub filter: RunnerFilter,
    pub feature_files: Vec<String>,
    pub tags: Vec<String>,
    pub tag_logic: Option<TagLogic>,
    pub exclude_tags: Vec<String>,
}

impl Selection {
    /// Copy the selection fields onto `record`.
    pub fn apply_to(&self, record: &mut ExecutionRecord) {
        record.feature_files = self.feature_files.clone();
        record.tags = self.tags.clone();
        record.tag_logic = self.tag_logic;
        record.exclude_tags = self.exclude_tags.clone();
    }

    /// Number of selected features for tag runs, `None` otherwise.
    pub fn matched_features(&self) -> Option<usize> {
        matches!(self.filter, RunnerFilter::Tags(_)).then_some(self.feature_files.len())
    }
}

/// Outcome of planning a valid request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Start the runner.
    Launch(Selection),
    /// Nothing to run: record `SKIPPED` with `note`, publish `message`.
    Skip {
        selection: Selection,
        note: String,
        message: String,
    },
}

impl Plan {
    pub fn selection(&self) -> &Selection {
        match self {
            Plan::Launch(selection) => selection,
            Plan::Skip { selection, .. } => selection,
        }
    }
}

/// Validate `request` against the catalog and tag validator.
pub fn plan(
    request: &RunRequest,
    catalog: &dyn FeatureCatalog,
    validator: &dyn TagValidator,
) -> Result<Plan> {
    match request.execution_type {
        ExecutionType::All => plan_all(catalog),
        ExecutionType::Feature => plan_features(request, catalog),
        ExecutionType::TagBased => plan_tags(
            ExecutionType::TagBased,
            &request.tags,
            request.tag_logic,
            Vec::new(),
            catalog,
            validator,
        ),
        ExecutionType::ComplexTag => {
            let exclude = normalize_all(&request.exclude_tags);
            if !exclude.is_empty() {
                warn!(
                    ?exclude,
                    "exclude tags are recorded but not applied to the runner filter"
                );
            }
            plan_tags(
                ExecutionType::ComplexTag,
                &request.tags,
                TagLogic::And,
                exclude,
                catalog,
                validator,
            )
        }
    }
}

fn plan_all(catalog: &dyn FeatureCatalog) -> Result<Plan> {
    let selection = Selection {
        execution_type: ExecutionType::All,
        filter: RunnerFilter::All,
        feature_files: Vec::new(),
        tags: Vec::new(),
        tag_logic: None,
        exclude_tags: Vec::new(),
    };

    let available = catalog.all_features()?;
    if available.is_empty() {
        info!("no feature files found; skipping run");
        return Ok(Plan::Skip {
            selection,
            note: "No feature files found to execute".to_string(),
            message: "No feature files found. Execution skipped.".to_string(),
        });
    }

    debug!(features = available.len(), "running all features");
    Ok(Plan::Launch(selection))
}

fn plan_features(request: &RunRequest, catalog: &dyn FeatureCatalog) -> Result<Plan> {
    let mut wanted: Vec<String> = Vec::new();
    for raw in &request.feature_files {
        let name = raw.trim();
        if name.is_empty() {
            continue;
        }
        let resolved = resolve_feature(catalog, name)?;
        if !wanted.contains(&resolved) {
            wanted.push(resolved);
        }
    }

    if wanted.is_empty() {
        return Err(BddrunError::validation("No feature files specified"));
    }

    Ok(Plan::Launch(Selection {
        execution_type: ExecutionType::Feature,
        filter: RunnerFilter::Features(wanted.clone()),
        feature_files: wanted,
        tags: Vec::new(),
        tag_logic: None,
        exclude_tags: Vec::new(),
    }))
}

/// Accept `login.feature` as well as plain `login`.
fn resolve_feature(catalog: &dyn FeatureCatalog, name: &str) -> Result<String> {
    if catalog.contains(name)? {
        return Ok(name.to_string());
    }
    let with_ext = format!("{name}.{FEATURE_EXTENSION}");
    if catalog.contains(&with_ext)? {
        return Ok(with_ext);
    }
    Err(BddrunError::validation(format!("Unknown feature: {name}")))
}

fn plan_tags(
    execution_type: ExecutionType,
    requested: &[String],
    logic: TagLogic,
    exclude_tags: Vec<String>,
    catalog: &dyn FeatureCatalog,
    validator: &dyn TagValidator,
) -> Result<Plan> {
    let tags = validator.validate(requested);
    if tags.is_empty() {
        return Err(BddrunError::validation(format!(
            "No valid tags found: [{}]",
            requested.join(", ")
        )));
    }

    let matching = catalog.features_matching(&tags, logic)?;
    let expression = build_expression(&tags, logic);

    let selection = Selection {
        execution_type,
        filter: RunnerFilter::Tags(expression),
        feature_files: matching,
        tags,
        tag_logic: Some(logic),
        exclude_tags,
    };

    if selection.feature_files.is_empty() {
        info!(tags = ?selection.tags, %logic, "no features match tags; skipping run");
        return Ok(Plan::Skip {
            note: format!(
                "No matching features found for tags: [{}]",
                selection.tags.join(", ")
            ),
            message: "No matching features found; execution skipped.".to_string(),
            selection,
        });
    }

    info!(
        tags = ?selection.tags,
        %logic,
        features = selection.feature_files.len(),
        "features selected by tags"
    );
    Ok(Plan::Launch(selection))
}
