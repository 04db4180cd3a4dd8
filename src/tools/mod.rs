//! Book tools
//!
//! One function per operation of the command line tool. Every tool opens its
//! input itself, returns a report describing what it did and leaves printing
//! and exit codes to the caller.
//!
//! Chapters are always the items classified as [`ItemKind::Document`], in
//! manifest order, numbered from 1. Navigation documents are classified
//! before numbering, so they never take a chapter number.

pub mod chapters;
pub mod create;
pub mod images;
pub mod merge;
pub mod metadata;
pub mod split;
pub mod text;
pub mod update;
pub mod validate;

use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use log::warn;

use crate::{
    epub::EpubDoc,
    error::EpubError,
    types::{EpubItem, ItemKind, MetadataRecord},
    utils::DecodeBytes,
};

/// Opens a book, reporting a missing path as [`EpubError::FileNotFound`]
pub(crate) fn open_book(path: &Path) -> Result<EpubDoc<BufReader<File>>, EpubError> {
    if !path.exists() {
        return Err(EpubError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        });
    }

    EpubDoc::new(path)
}

/// The chapter documents of a book, numbered from 1
pub(crate) fn numbered_chapters<R: Read + Seek>(doc: &EpubDoc<R>) -> Vec<(usize, EpubItem)> {
    doc.items_of_kind(ItemKind::Document)
        .into_iter()
        .enumerate()
        .map(|(index, item)| (index + 1, item))
        .collect()
}

/// Decoded markup of a content document
///
/// A document too short to carry any markup decodes to an empty string.
pub(crate) fn document_source<R: Read + Seek>(
    doc: &mut EpubDoc<R>,
    item: &EpubItem,
) -> Result<String, EpubError> {
    match doc.get_item_content(&item.id)?.decode() {
        Ok(source) => Ok(source),
        Err(EpubError::EmptyDataError) => {
            warn!("Chapter '{}' is empty.", item.name);
            Ok(String::new())
        }
        Err(err) => Err(err),
    }
}

/// The metadata block shown with rendered chapters
pub(crate) fn metadata_record<R: Read + Seek>(doc: &EpubDoc<R>) -> MetadataRecord {
    MetadataRecord {
        title: doc.first_metadata_value("title"),
        author: doc
            .get_metadata_value("creator")
            .map(|creators| creators.join(", ")),
        language: doc.first_metadata_value("language"),
        publisher: doc.first_metadata_value("publisher"),
    }
}


#[cfg(test)]
mod tests {
    use crate::{
        error::EpubError,
        tools::{document_source, fixtures, metadata_record, numbered_chapters, open_book},
    };

    /// The navigation document comes first in the manifest but is not a chapter
    #[test]
    fn test_navigation_never_takes_a_number() {
        let dir = tempfile::tempdir().unwrap();
        let doc = open_book(&fixtures::sample_book(dir.path())).unwrap();

        assert_eq!(doc.items()[0].name, "nav.xhtml");
        let chapters = numbered_chapters(&doc);
        let numbers = chapters.iter().map(|(n, item)| (*n, item.name.as_str())).collect::<Vec<_>>();
        assert_eq!(
            numbers,
            vec![
                (1, "chapter_01.xhtml"),
                (2, "chapter_02.xhtml"),
                (3, "chapter_03.xhtml")
            ]
        );
    }

    #[test]
    fn test_metadata_record() {
        let dir = tempfile::tempdir().unwrap();
        let doc = open_book(&fixtures::sample_book(dir.path())).unwrap();

        let record = metadata_record(&doc);
        assert_eq!(record.title.as_deref(), Some("测试书籍"));
        assert_eq!(record.author.as_deref(), Some("测试作者"));
        assert_eq!(record.publisher.as_deref(), Some("测试出版社"));

        let untitled = open_book(&fixtures::untitled_book(dir.path())).unwrap();
        assert_eq!(metadata_record(&untitled).title, None);
    }

    #[test]
    fn test_document_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = open_book(&fixtures::sample_book(dir.path())).unwrap();

        let (_, item) = numbered_chapters(&doc).remove(2);
        let source = document_source(&mut doc, &item).unwrap();
        assert!(source.contains("<strong>bold</strong>"));
    }

    #[test]
    fn test_open_missing_book() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.epub");

        assert_eq!(
            open_book(&path).err(),
            Some(EpubError::FileNotFound {
                path: path.to_string_lossy().to_string()
            })
        );
    }
}
