//! Book metadata summary

use std::{fmt, path::Path};

use serde::Serialize;

use crate::{
    error::EpubError,
    tools::{numbered_chapters, open_book},
    types::{ItemKind, UNKNOWN_VALUE},
};

/// Descriptive metadata and content counts of a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookInfo {
    pub file: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub publish_date: Option<String>,

    /// The first identifier mentioning an ISBN, else the first identifier
    pub isbn: Option<String>,
    pub description: Option<String>,
    pub chapters_count: usize,
    pub images_count: usize,
}

impl BookInfo {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for BookInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or(UNKNOWN_VALUE)
        }

        let rule = "=".repeat(50);
        let authors = match self.authors.is_empty() {
            true => UNKNOWN_VALUE.to_string(),
            false => self.authors.join(", "),
        };

        writeln!(f, "{}", rule)?;
        writeln!(f, "文件: {}", self.file)?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "书名: {}", show(&self.title))?;
        writeln!(f, "作者: {}", authors)?;
        writeln!(f, "语言: {}", show(&self.language))?;
        writeln!(f, "出版社: {}", show(&self.publisher))?;
        writeln!(f, "出版日期: {}", show(&self.publish_date))?;
        writeln!(f, "ISBN: {}", show(&self.isbn))?;
        writeln!(f, "章节数: {}", self.chapters_count)?;
        writeln!(f, "图片数: {}", self.images_count)?;
        if let Some(description) = &self.description {
            writeln!(f, "\n简介:\n{}", description)?;
        }
        write!(f, "{}", rule)
    }
}

/// Read the metadata of the book at `path`
pub fn extract_metadata<P: AsRef<Path>>(path: P) -> Result<BookInfo, EpubError> {
    let path = path.as_ref();
    let doc = open_book(path)?;

    let identifiers = doc.get_metadata("identifier").unwrap_or_default();
    let isbn = identifiers
        .iter()
        .find(|identifier| identifier.mentions_isbn())
        .or_else(|| identifiers.first())
        .map(|identifier| identifier.value.clone());

    Ok(BookInfo {
        file: path.to_string_lossy().to_string(),
        title: doc.first_metadata_value("title"),
        authors: doc.get_metadata_value("creator").unwrap_or_default(),
        language: doc.first_metadata_value("language"),
        publisher: doc.first_metadata_value("publisher"),
        publish_date: doc.first_metadata_value("date"),
        isbn,
        description: doc.first_metadata_value("description"),
        chapters_count: numbered_chapters(&doc).len(),
        images_count: doc.items_of_kind(ItemKind::Image).len(),
    })
}
