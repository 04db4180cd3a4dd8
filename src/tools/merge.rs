//! Merging several books into one

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
    builder::{EpubBuilder, EpubVersion3},
    config::Settings,
    error::EpubError,
    tools::{numbered_chapters, open_book},
    types::{ItemKind, ManifestItem, MetadataItem, NavPoint, SpineItem},
};

#[derive(Debug, Default)]
pub struct MergeReport {
    pub output: PathBuf,

    /// Each merged input with the number of chapters taken from it
    pub books: Vec<(PathBuf, usize)>,

    /// Inputs that do not exist
    pub skipped: Vec<PathBuf>,
}

impl MergeReport {
    pub fn chapters(&self) -> usize {
        self.books.iter().map(|(_, count)| count).sum()
    }
}

/// Merge the books at `inputs` into a new book at `output`
///
/// Chapters of the `i`-th input (1-based) become `book{i}_chap{n}.xhtml`,
/// listed in the table of contents as `{book title} - 第{n}章`. Images and
/// stylesheets keep their path behind a `book{i}_` prefix and get the id
/// `book{i}_res_{id}`. Inputs that do
/// not exist are skipped with a warning.
///
/// # Return
/// - `Err(EpubError::NoChapters)`: None of the inputs had a chapter
pub fn merge_epubs<P: AsRef<Path>, Q: AsRef<Path>>(
    inputs: &[P],
    output: Q,
    settings: &Settings,
) -> Result<MergeReport, EpubError> {
    let output = output.as_ref().to_path_buf();
    let output_name = output
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut builder = EpubBuilder::<EpubVersion3>::new();
    builder
        .add_metadata(MetadataItem::new("identifier", &format!("merged_{}", output_name)).with_id("pub-id"))
        .add_metadata(MetadataItem::new("title", &settings.merge.title))
        .add_metadata(MetadataItem::new("language", &settings.merge.language))
        .set_catalog_title(&settings.merge.title);

    let mut report = MergeReport {
        output: output.clone(),
        ..Default::default()
    };
    let mut added_resources = HashSet::new();

    for (index, input) in inputs.iter().enumerate() {
        let book_number = index + 1;
        let input = input.as_ref();
        if !input.exists() {
            warn!("Input {} does not exist, skipping.", input.display());
            report.skipped.push(input.to_path_buf());
            continue;
        }

        let mut doc = open_book(input)?;
        let book_title = doc
            .first_metadata_value("title")
            .unwrap_or_else(|| format!("书{}", book_number));
        info!("Merging {} ({})", input.display(), book_title);

        let chapters = numbered_chapters(&doc);
        for (number, item) in &chapters {
            let id = format!("book{}_chap{}", book_number, number);
            let href = format!("{}.xhtml", id);

            builder
                .add_resource(
                    ManifestItem::new(&id, &href, &item.mime),
                    doc.get_item_content(&item.id)?,
                )?
                .add_spine(SpineItem::new(&id))
                .add_catalog_item(NavPoint::new(
                    &format!("{} - 第{}章", book_title, number),
                    &href,
                ));
        }

        let resources = doc
            .items()
            .into_iter()
            .filter(|item| matches!(item.kind, ItemKind::Image | ItemKind::Stylesheet));
        for item in resources {
            let href = format!("book{}_{}", book_number, item.name);
            if !added_resources.insert(href.clone()) {
                continue;
            }

            builder.add_resource(
                ManifestItem::new(
                    &format!("book{}_res_{}", book_number, item.id),
                    &href,
                    &item.mime,
                ),
                doc.get_item_content(&item.id)?,
            )?;
        }

        report.books.push((input.to_path_buf(), chapters.len()));
    }

    if report.chapters() == 0 {
        return Err(EpubError::NoChapters {
            source_name: inputs
                .iter()
                .map(|input| input.as_ref().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    builder.make(&output)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        builder::{EpubBuilder, EpubVersion3, xhtml_document},
        config::load_defaults,
        epub::EpubDoc,
        error::EpubError,
        tools::{fixtures, merge::merge_epubs},
        types::{ItemKind, ManifestItem, MetadataItem, NavPoint, SpineItem},
    };

    #[test]
    fn test_merge_two_books() {
        let dir = tempfile::tempdir().unwrap();
        let first = fixtures::sample_book(dir.path());
        let second_dir = dir.path().join("second");
        fs::create_dir(&second_dir).unwrap();
        let second = fixtures::untitled_book(&second_dir);
        let missing = dir.path().join("missing.epub");
        let output = dir.path().join("merged.epub");

        let report = merge_epubs(
            &[first.clone(), missing.clone(), second.clone()],
            &output,
            &load_defaults().unwrap(),
        )
        .unwrap();
        assert_eq!(report.chapters(), 6);
        assert_eq!(report.skipped, vec![missing]);

        let doc = EpubDoc::new(&output).unwrap();
        assert_eq!(doc.get_title().unwrap(), vec!["合并的电子书"]);
        assert_eq!(doc.get_language().unwrap(), vec!["zh-CN"]);
        assert_eq!(doc.get_identifier().unwrap(), vec!["merged_merged.epub"]);

        let names = doc
            .items_of_kind(ItemKind::Document)
            .into_iter()
            .map(|item| item.name)
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "book1_chap1.xhtml",
                "book1_chap2.xhtml",
                "book1_chap3.xhtml",
                "book3_chap1.xhtml",
                "book3_chap2.xhtml",
                "book3_chap3.xhtml"
            ]
        );

        let images = doc.items_of_kind(ItemKind::Image);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "book1_images/cover.png");
        assert_eq!(doc.items_of_kind(ItemKind::Stylesheet).len(), 2);

        assert_eq!(doc.catalog.len(), 6);
        assert_eq!(doc.catalog[0].label, "测试书籍 - 第1章");
        assert_eq!(doc.catalog[3].label, "书3 - 第1章");
        assert_eq!(doc.spine.len(), 6);
    }

    /// Resource ids never collide with generated chapter ids
    #[test]
    fn test_resource_id_shaped_like_chapter_id() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("odd.epub");

        let mut builder = EpubBuilder::<EpubVersion3>::new();
        builder
            .add_metadata(MetadataItem::new("title", "odd"))
            .add_metadata(MetadataItem::new("language", "en"))
            .add_metadata(MetadataItem::new("identifier", "odd"))
            .add_resource(
                ManifestItem::new("text", "text.xhtml", "application/xhtml+xml"),
                xhtml_document("text", "<p>content</p>", None).into_bytes(),
            )
            .unwrap()
            .add_resource(ManifestItem::new("chap1", "chap1.png", "image/png"), fixtures::PNG.to_vec())
            .unwrap()
            .add_spine(SpineItem::new("text"))
            .add_catalog_item(NavPoint::new("text", "text.xhtml"));
        builder.make(&input).unwrap();

        let output = dir.path().join("merged.epub");
        let report = merge_epubs(&[input], &output, &load_defaults().unwrap()).unwrap();
        assert_eq!(report.chapters(), 1);

        let doc = EpubDoc::new(&output).unwrap();
        assert!(doc.manifest.contains_key("book1_chap1"));
        assert_eq!(doc.manifest["book1_res_chap1"].mime, "image/png");
    }

    #[test]
    fn test_merge_without_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("merged.epub");

        let result = merge_epubs(&[dir.path().join("a.epub")], &output, &load_defaults().unwrap());
        assert!(matches!(result, Err(EpubError::NoChapters { .. })));
        assert!(!output.exists());
    }
}
