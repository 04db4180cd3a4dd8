//! Splitting a book into one book per chapter

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    builder::{EpubBuilder, EpubVersion3},
    config::Settings,
    error::EpubError,
    tools::{numbered_chapters, open_book},
    types::{ItemKind, ManifestItem, MetadataItem, NavPoint, SpineItem},
};

#[derive(Debug, Default)]
pub struct SplitReport {
    pub output_dir: PathBuf,

    /// Written books in chapter order
    pub files: Vec<PathBuf>,
}

/// File name of the book holding chapter `number`
pub fn split_file_name(number: usize) -> String {
    format!("chapter_{:03}.epub", number)
}

/// Base name of the split books: the title with spaces and `/` replaced
fn base_name(title: Option<String>) -> String {
    title
        .map(|title| title.replace([' ', '/'], "_"))
        .unwrap_or_else(|| "chapter".to_string())
}

/// Write every chapter of the book at `input` as its own book into `output_dir`
///
/// Each book holds one chapter plus every image and stylesheet, keeps the
/// authors and language of the source, and is titled `{base} - 第{n}章`
/// with the identifier `{base}_chapter_{n}`. A source without a language
/// gets the configured one.
///
/// # Return
/// - `Err(EpubError::NoChapters)`: The book has no chapter documents
pub fn split_epub<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output_dir: Q,
    settings: &Settings,
) -> Result<SplitReport, EpubError> {
    let input = input.as_ref();
    let mut doc = open_book(input)?;

    let chapters = numbered_chapters(&doc);
    if chapters.is_empty() {
        return Err(EpubError::NoChapters {
            source_name: input.to_string_lossy().to_string(),
        });
    }

    let output_dir = output_dir.as_ref().to_path_buf();
    fs::create_dir_all(&output_dir)?;

    let base = base_name(doc.first_metadata_value("title"));
    let language = doc
        .first_metadata_value("language")
        .unwrap_or_else(|| settings.book.language.clone());
    let authors = doc.get_metadata_value("creator").unwrap_or_default();

    let mut shared = Vec::new();
    for item in doc.items() {
        if matches!(item.kind, ItemKind::Image | ItemKind::Stylesheet) {
            let data = doc.get_item_content(&item.id)?;
            shared.push((ManifestItem::new(&item.id, &item.name, &item.mime), data));
        }
    }

    let mut report = SplitReport {
        output_dir,
        ..Default::default()
    };

    for (number, item) in chapters {
        let title = format!("{} - 第{}章", base, number);

        let mut builder = EpubBuilder::<EpubVersion3>::new();
        builder
            .add_metadata(
                MetadataItem::new("identifier", &format!("{}_chapter_{}", base, number))
                    .with_id("pub-id"),
            )
            .add_metadata(MetadataItem::new("title", &title))
            .add_metadata(MetadataItem::new("language", &language));
        for author in &authors {
            builder.add_metadata(MetadataItem::new("creator", author));
        }

        let mut chapter = ManifestItem::new(&item.id, &item.name, &item.mime);
        chapter.properties = item.properties.clone();
        builder
            .add_resource(chapter, doc.get_item_content(&item.id)?)?
            .add_spine(SpineItem::new(&item.id))
            .add_catalog_item(NavPoint::new(&title, &item.name));

        for (resource, data) in &shared {
            builder.add_resource(resource.clone(), data.clone())?;
        }

        let path = report.output_dir.join(split_file_name(number));
        builder.make(&path)?;
        info!("Wrote chapter {} to {}", number, path.display());
        report.files.push(path);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use crate::{
        config::load_defaults,
        epub::EpubDoc,
        tools::{
            fixtures,
            split::{base_name, split_epub},
        },
        types::ItemKind,
        utils::DecodeBytes,
    };

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Some("A Tale/Two".to_string())), "A_Tale_Two");
        assert_eq!(base_name(None), "chapter");
    }

    #[test]
    fn test_split_sample_book() {
        let dir = tempfile::tempdir().unwrap();
        let book = fixtures::sample_book(dir.path());
        let output = dir.path().join("parts");

        let report = split_epub(&book, &output, &load_defaults().unwrap()).unwrap();
        assert_eq!(
            report.files,
            vec![
                output.join("chapter_001.epub"),
                output.join("chapter_002.epub"),
                output.join("chapter_003.epub")
            ]
        );

        let mut doc = EpubDoc::new(output.join("chapter_003.epub")).unwrap();
        assert_eq!(doc.get_title().unwrap(), vec!["测试书籍 - 第3章"]);
        assert_eq!(doc.get_identifier().unwrap(), vec!["测试书籍_chapter_3"]);
        assert_eq!(doc.get_language().unwrap(), vec!["zh-CN"]);
        assert_eq!(doc.get_metadata_value("creator").unwrap(), vec!["测试作者"]);
        assert_eq!(doc.items_of_kind(ItemKind::Image).len(), 1);
        assert_eq!(doc.items_of_kind(ItemKind::Stylesheet).len(), 1);

        let documents = doc.items_of_kind(ItemKind::Document);
        assert_eq!(documents.len(), 1);
        let content = doc.get_item_content(&documents[0].id).unwrap().decode().unwrap();
        assert!(content.contains("<strong>bold</strong>"));
    }

    #[test]
    fn test_untitled_book_uses_generic_base() {
        let dir = tempfile::tempdir().unwrap();
        let book = fixtures::untitled_book(dir.path());

        let report = split_epub(&book, dir.path().join("parts"), &load_defaults().unwrap()).unwrap();
        let doc = EpubDoc::new(&report.files[0]).unwrap();
        assert_eq!(doc.get_title().unwrap(), vec!["chapter - 第1章"]);
    }
}
