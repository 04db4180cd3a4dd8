//! EPUB authoring from a Markdown file

use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use log::info;
use quick_xml::escape::escape;
use regex::Regex;

use crate::{
    builder::{EpubBuilder, EpubVersion3, xhtml_document},
    config::Settings,
    error::EpubError,
    markdown::markdown_to_html,
    types::{ManifestItem, MetadataItem, NavPoint, SpineItem},
};

static FIRST_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid heading pattern"));

const CHAPTER_ID: &str = "chapter_01";
const CHAPTER_FILE: &str = "chapter_01.xhtml";
const STYLESHEET_FILE: &str = "style.css";

/// Optional inputs of [`create_epub`]
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Defaults to the first `# ` heading, else the Markdown file name
    pub title: Option<String>,

    /// Defaults to the configured author
    pub author: Option<String>,

    /// Cover image; its media type is detected from the content
    pub cover: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReport {
    pub output: PathBuf,
    pub title: String,
    pub author: String,
}

/// Turn the Markdown file at `markdown` into a single chapter book
///
/// The book is identified by the Markdown file name. Its language and
/// stylesheet come from `settings`.
pub fn create_epub<P: AsRef<Path>, Q: AsRef<Path>>(
    markdown: P,
    output: Q,
    options: &CreateOptions,
    settings: &Settings,
) -> Result<CreateReport, EpubError> {
    let markdown = markdown.as_ref();
    if !markdown.is_file() {
        return Err(EpubError::FileNotFound {
            path: markdown.to_string_lossy().to_string(),
        });
    }

    let source = fs::read_to_string(markdown)?;
    let file_name = markdown
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let title = match &options.title {
        Some(title) => title.clone(),
        None => FIRST_HEADING
            .captures(&source)
            .map(|captures| captures[1].trim().to_string())
            .unwrap_or_else(|| file_name.clone()),
    };
    let author = options
        .author
        .clone()
        .unwrap_or_else(|| settings.book.author.clone());

    let body = format!("<h1>{}</h1>\n{}", escape(&title), markdown_to_html(&source));
    let chapter = xhtml_document(&title, &body, Some(STYLESHEET_FILE));

    let mut builder = EpubBuilder::<EpubVersion3>::new();
    builder
        .add_metadata(MetadataItem::new("identifier", &file_name).with_id("pub-id"))
        .add_metadata(MetadataItem::new("title", &title))
        .add_metadata(MetadataItem::new("language", &settings.book.language))
        .add_metadata(MetadataItem::new("creator", &author))
        .add_resource(
            ManifestItem::new(CHAPTER_ID, CHAPTER_FILE, "application/xhtml+xml"),
            chapter.into_bytes(),
        )?
        .add_resource(
            ManifestItem::new("style", STYLESHEET_FILE, "text/css"),
            settings.create.stylesheet.clone().into_bytes(),
        )?
        .add_spine(SpineItem::new(CHAPTER_ID))
        .set_catalog_title(&title)
        .add_catalog_item(NavPoint::new(&title, CHAPTER_FILE));

    if let Some(cover) = &options.cover {
        let extension = cover
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "img".to_string());

        builder
            .add_manifest_file(
                cover,
                ManifestItem::new("cover-image", &format!("images/cover.{}", extension), "")
                    .with_properties("cover-image"),
            )?
            .add_metadata(MetadataItem::new("cover", "cover-image"));
    }

    let output = output.as_ref().to_path_buf();
    builder.make(&output)?;
    info!("Created {} from {}", output.display(), markdown.display());

    Ok(CreateReport {
        output,
        title,
        author,
    })
}
