//! Chapter extraction
//!
//! Renders every chapter document of a book in one of the supported output
//! formats and writes the result either as one combined file or as one file
//! per chapter, optionally with a plain text table of contents.

use std::{
    fs,
    io::{Read, Seek},
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    epub::EpubDoc,
    error::EpubError,
    render::{chapter_title, render_chapter},
    tools::{document_source, metadata_record, numbered_chapters, open_book},
    types::{Chapter, MetadataRecord, OutputFormat},
};

/// Name of the table of contents file
pub const TOC_FILE_NAME: &str = "TOC.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterOptions {
    pub format: OutputFormat,

    /// Write `chapter_NNN.ext` files instead of a single `chapters.ext`
    pub separate: bool,

    /// Also write [`TOC_FILE_NAME`]
    pub toc: bool,

    /// Put the book metadata at the top of every chapter
    pub metadata: bool,
}

impl Default for ChapterOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            separate: false,
            toc: false,
            metadata: false,
        }
    }
}

/// What [`extract_chapters`] wrote
#[derive(Debug)]
pub struct ChaptersReport {
    pub chapters: Vec<Chapter>,

    /// Chapter files, or the single combined file
    pub files: Vec<PathBuf>,
    pub toc: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
}

/// File name of a chapter written in separate mode
pub fn chapter_file_name(number: usize, format: OutputFormat) -> String {
    format!("chapter_{:03}.{}", number, format.extension())
}

/// Render every chapter document of `doc`
///
/// Chapters are numbered in manifest order. A chapter without an `h1`..`h3`
/// heading is titled `第 {n} 章`.
pub fn collect_chapters<R: Read + Seek>(
    doc: &mut EpubDoc<R>,
    format: OutputFormat,
    metadata: Option<&MetadataRecord>,
) -> Result<Vec<Chapter>, EpubError> {
    let mut chapters = Vec::new();

    for (number, item) in numbered_chapters(doc) {
        let source = document_source(doc, &item)?;
        let title = chapter_title(&source, &format!("第 {} 章", number));
        debug!("Rendering chapter {} '{}' from {}", number, title, item.name);

        chapters.push(Chapter {
            number,
            content: render_chapter(&source, format, &title, metadata),
            title,
            source: item.name,
        });
    }

    Ok(chapters)
}

/// Extract the chapters of the book at `epub` into `output_dir`
///
/// The output directory is created when missing. Existing files with the
/// same names are overwritten.
pub fn extract_chapters<P: AsRef<Path>, Q: AsRef<Path>>(
    epub: P,
    output_dir: Q,
    options: &ChapterOptions,
) -> Result<ChaptersReport, EpubError> {
    let output_dir = output_dir.as_ref().to_path_buf();
    fs::create_dir_all(&output_dir)?;

    let mut doc = open_book(epub.as_ref())?;
    let metadata = options.metadata.then(|| metadata_record(&doc));
    let chapters = collect_chapters(&mut doc, options.format, metadata.as_ref())?;

    let mut files = Vec::new();
    if options.separate {
        for chapter in &chapters {
            let path = output_dir.join(chapter_file_name(chapter.number, options.format));
            fs::write(&path, &chapter.content)?;
            files.push(path);
        }
    } else {
        let path = output_dir.join(format!("chapters.{}", options.format.extension()));
        let combined = chapters
            .iter()
            .map(|chapter| chapter.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&path, combined)?;
        files.push(path);
    }

    let toc = match options.toc {
        true => {
            let path = output_dir.join(TOC_FILE_NAME);
            fs::write(&path, table_of_contents(&chapters, options))?;
            Some(path)
        }
        false => None,
    };

    info!(
        "Extracted {} chapters into {}",
        chapters.len(),
        output_dir.display()
    );

    Ok(ChaptersReport {
        chapters,
        files,
        toc,
        output_dir,
        format: options.format,
    })
}

fn table_of_contents(chapters: &[Chapter], options: &ChapterOptions) -> String {
    let mut toc = format!("目录\n{}\n\n", "=".repeat(50));

    for chapter in chapters {
        toc.push_str(&format!("{}. {}\n", chapter.number, chapter.title));
        if options.separate {
            toc.push_str(&format!(
                "   文件: {}\n",
                chapter_file_name(chapter.number, options.format)
            ));
        }
        toc.push('\n');
    }

    toc
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        tools::{
            chapters::{ChapterOptions, TOC_FILE_NAME, collect_chapters, extract_chapters},
            fixtures, open_book,
        },
        types::OutputFormat,
    };

    #[test]
    fn test_collect_chapters_numbering_and_titles() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = open_book(&fixtures::sample_book(dir.path())).unwrap();

        let chapters = collect_chapters(&mut doc, OutputFormat::Text, None).unwrap();
        let summary = chapters
            .iter()
            .map(|chapter| (chapter.number, chapter.title.as_str(), chapter.source.as_str()))
            .collect::<Vec<_>>();

        assert_eq!(
            summary,
            vec![
                (1, "第一章 开始", "chapter_01.xhtml"),
                (2, "第二章 发展", "chapter_02.xhtml"),
                (3, "第三章 结局", "chapter_03.xhtml"),
            ]
        );
        assert!(chapters[0].content.contains("章节: 第一章 开始"));
    }

    #[test]
    fn test_separate_markdown_with_toc() {
        let dir = tempfile::tempdir().unwrap();
        let book = fixtures::sample_book(dir.path());
        let output = dir.path().join("out/nested");

        let options = ChapterOptions {
            format: OutputFormat::Markdown,
            separate: true,
            toc: true,
            metadata: false,
        };
        let report = extract_chapters(&book, &output, &options).unwrap();

        assert_eq!(report.files.len(), 3);
        assert!(output.join("chapter_001.md").is_file());
        assert!(output.join("chapter_003.md").is_file());
        assert!(!output.join("chapter_004.md").exists());

        let third = fs::read_to_string(output.join("chapter_003.md")).unwrap();
        assert!(third.starts_with("# 第三章 结局\n"));
        assert!(
            third
                .lines()
                .any(|line| line == "This has **bold** and *italic* text.")
        );

        let toc = fs::read_to_string(output.join(TOC_FILE_NAME)).unwrap();
        assert!(toc.starts_with(&format!("目录\n{}\n\n1. 第一章 开始\n", "=".repeat(50))));
        assert!(toc.contains("3. 第三章 结局\n   文件: chapter_003.md\n"));
    }

    #[test]
    fn test_combined_html_file() {
        let dir = tempfile::tempdir().unwrap();
        let book = fixtures::sample_book(dir.path());

        let options = ChapterOptions {
            format: OutputFormat::Html,
            ..Default::default()
        };
        let report = extract_chapters(&book, dir.path(), &options).unwrap();

        assert_eq!(report.files, vec![dir.path().join("chapters.html")]);
        assert!(report.toc.is_none());
        let combined = fs::read_to_string(&report.files[0]).unwrap();
        assert_eq!(combined.matches("<!DOCTYPE html>").count(), 3);
    }

    #[test]
    fn test_metadata_of_untitled_book() {
        let dir = tempfile::tempdir().unwrap();
        let book = fixtures::untitled_book(dir.path());

        let options = ChapterOptions {
            metadata: true,
            ..Default::default()
        };
        let report = extract_chapters(&book, dir.path().join("out"), &options).unwrap();

        let combined = fs::read_to_string(&report.files[0]).unwrap();
        assert!(combined.contains("书名: 未知"));
        assert!(combined.contains("出版社: 测试出版社"));
    }
}
