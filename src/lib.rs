//! Epub toolkit
//!
//! A Rust library for reading, converting and rewriting EPUB eBook files.
//!
//! This library parses EPUB 2 and EPUB 3 packages, extracts their metadata,
//! text, images and chapters, and writes new EPUB 3 packages from Markdown
//! or from the content of existing books.
//!
//! ## Features
//!
//! - Parse EPUB file structure and containers, extract metadata, access resource files.
//! - Build EPUB 3 packages with a generated navigation document and NCX.
//! - Convert Markdown into chapter HTML and chapter HTML into text, Markdown or HTML.
//! - Merge, split, rewrite and validate books through the [`tools`] module.
//!
//! ## Quick Start
//!
//! ### Read EPUB Files
//!
//! ```rust, no_run
//! # use epub_toolkit::epub::EpubDoc;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Open EPUB file
//! let mut doc = EpubDoc::new("path/to/epub/file.epub")?;
//!
//! // Get metadata
//! println!("Title: {:?}", doc.get_title()?);
//! println!("Creator: {:?}", doc.get_metadata_value("creator"));
//!
//! // Read content
//! let first = doc.items()[0].id.clone();
//! let _content = doc.get_item_content(&first)?;
//!
//! # Ok(())
//! # }
//! ```
//!
//! ### Extract chapters
//!
//! ```rust, no_run
//! # use epub_toolkit::{tools::chapters::{extract_chapters, ChapterOptions}, types::OutputFormat};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ChapterOptions {
//!     format: OutputFormat::Markdown,
//!     separate: true,
//!     ..Default::default()
//! };
//! let report = extract_chapters("book.epub", "output", &options)?;
//! println!("{} chapters", report.chapters.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `cli`: Enabled by default. Builds the `epub-toolkit` command line binary
//!   and derives `clap::ValueEnum` for [`types::OutputFormat`].

pub(crate) mod utils;

pub mod builder;
pub mod config;
pub mod epub;
pub mod error;
pub mod markdown;
pub mod render;
pub mod tools;
pub mod types;

pub use utils::DecodeBytes;
