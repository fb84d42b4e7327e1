// src/tags/expression.rs

use crate::types::TagLogic;

/// Join validated tags into a cucumber tag expression.
///
/// Tags are expected to be normalised already (see [`super::normalize_tag`]).
/// An empty slice yields an empty expression.
///
/// ```
/// use bddrun::tags::build_expression;
/// use bddrun::types::TagLogic;
///
/// let tags = vec!["@smoke".to_string(), "@login".to_string()];
/// assert_eq!(build_expression(&tags, TagLogic::And), "@smoke and @login");
/// assert_eq!(build_expression(&tags, TagLogic::Or), "@smoke or @login");
/// assert_eq!(build_expression(&[], TagLogic::Or), "");
/// ```
pub fn build_expression(tags: &[String], logic: TagLogic) -> String {
    tags.join(logic.joiner())
}
