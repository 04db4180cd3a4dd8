//! Whole book plain text

use std::path::Path;

use crate::{
    error::EpubError,
    render::plain_text,
    tools::{document_source, numbered_chapters, open_book},
};

const RULE_WIDTH: usize = 60;

/// All text of the book at `path`
///
/// Every chapter starts with a `第 {n} 章` banner followed by its text, one
/// line per text node.
pub fn extract_text<P: AsRef<Path>>(path: P) -> Result<String, EpubError> {
    let mut doc = open_book(path.as_ref())?;
    let rule = "=".repeat(RULE_WIDTH);

    let mut parts = Vec::new();
    for (number, item) in numbered_chapters(&doc) {
        let source = document_source(&mut doc, &item)?;

        parts.push(format!("\n{}\n第 {} 章\n{}\n", rule, number, rule));
        parts.push(plain_text(&source));
    }

    Ok(parts.join("\n"))
}
