//! Metadata rewriting

use std::path::Path;

use log::info;

use crate::{
    builder::{EpubBuilder, EpubVersion3},
    error::EpubError,
    tools::open_book,
};

/// New values for the metadata fields that can be rewritten
///
/// A field left at `None` keeps its current values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataChanges {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
}

impl MetadataChanges {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// `(label, property, value)` of every provided field
    fn fields(&self) -> Vec<(&'static str, &'static str, &str)> {
        [
            ("标题", "title", &self.title),
            ("作者", "creator", &self.author),
            ("语言", "language", &self.language),
            ("出版社", "publisher", &self.publisher),
            ("ISBN", "identifier", &self.isbn),
        ]
        .into_iter()
        .filter_map(|(label, property, value)| {
            value.as_deref().map(|value| (label, property, value))
        })
        .collect()
    }
}

/// Fields written by [`update_metadata`], as `(label, new value)`
///
/// Empty when nothing was requested; the book is not rewritten then.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub applied: Vec<(&'static str, String)>,
}

/// Rewrite the metadata of the book at `path` in place
///
/// Every provided field replaces all existing values of that field. All
/// resources, the reading order and the table of contents are kept.
pub fn update_metadata<P: AsRef<Path>>(
    path: P,
    changes: &MetadataChanges,
) -> Result<UpdateReport, EpubError> {
    let path = path.as_ref();
    let mut doc = open_book(path)?;

    let mut report = UpdateReport::default();
    if changes.is_empty() {
        return Ok(report);
    }

    let mut builder = EpubBuilder::<EpubVersion3>::from_doc(&mut doc)?;
    drop(doc);

    for (label, property, value) in changes.fields() {
        builder.set_metadata(property, &[value]);
        report.applied.push((label, value.to_string()));
    }

    builder.make(path)?;
    info!("Updated {} metadata fields of {}", report.applied.len(), path.display());

    Ok(report)
}
