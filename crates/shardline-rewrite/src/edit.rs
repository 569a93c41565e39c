//! Ordered, non-overlapping text edits.
//!
//! Every rewrite is expressed as a list of `(span, replacement)` pairs
//! against the original SQL. The list is checked once and applied in a
//! single left-to-right pass, so the original text between edits is copied
//! verbatim.

use shardline_error::{Result, ShardError};
use shardline_parser::Span;

/// Replace `span` of the original text with `replacement`.
///
/// A zero-width span is a pure insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlEdit {
    pub span: Span,
    pub replacement: String,
}

impl SqlEdit {
    #[must_use]
    pub fn replace(span: Span, replacement: impl Into<String>) -> Self {
        Self {
            span,
            replacement: replacement.into(),
        }
    }

    #[must_use]
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        Self::replace(Span::point(position), text)
    }
}

/// Check that `edits` are sorted, non-overlapping, in bounds, and aligned
/// to character boundaries of `sql`.
pub fn validate_edits(sql: &str, edits: &[SqlEdit]) -> Result<()> {
    let mut cursor = 0usize;
    for (i, edit) in edits.iter().enumerate() {
        let Span { start, end } = edit.span;
        if start > end {
            return Err(ShardError::rewrite(format!(
                "edit {i} has inverted span {start}..{end}"
            )));
        }
        if end > sql.len() {
            return Err(ShardError::rewrite(format!(
                "edit {i} span {start}..{end} exceeds sql length {}",
                sql.len()
            )));
        }
        if !sql.is_char_boundary(start) || !sql.is_char_boundary(end) {
            return Err(ShardError::rewrite(format!(
                "edit {i} span {start}..{end} splits a character"
            )));
        }
        if start < cursor {
            return Err(ShardError::rewrite(format!(
                "edit {i} at {start} overlaps or precedes the previous edit ending at {cursor}"
            )));
        }
        cursor = end;
    }
    Ok(())
}

/// Apply validated `edits` to `sql` in one pass.
pub fn apply_edits(sql: &str, edits: &[SqlEdit]) -> Result<String> {
    validate_edits(sql, edits)?;
    let extra: usize = edits.iter().map(|e| e.replacement.len()).sum();
    let mut out = String::with_capacity(sql.len() + extra);
    let mut cursor = 0usize;
    for edit in edits {
        out.push_str(&sql[cursor..edit.span.start]);
        out.push_str(&edit.replacement);
        cursor = edit.span.end;
    }
    out.push_str(&sql[cursor..]);
    Ok(out)
}
