//! Epub Builder
//!
//! This module writes EPUB 3.0 packages. `EpubBuilder` keeps every resource
//! in memory and produces the archive in one pass: the `mimetype` entry
//! (stored, first), `META-INF/container.xml`, the package document, and any
//! resources added by the caller.
//!
//! When the caller does not supply them, a navigation document
//! (`nav.xhtml`) and an EPUB 2 NCX (`toc.ncx`) are generated from the
//! catalog, so older reading systems still find a table of contents.
//!
//! ## Usage
//!
//! ```rust, no_run
//! # fn main() -> Result<(), epub_toolkit::error::EpubError> {
//! use epub_toolkit::{
//!     builder::{EpubBuilder, EpubVersion3},
//!     types::{ManifestItem, MetadataItem, NavPoint, SpineItem},
//! };
//!
//! let mut builder = EpubBuilder::<EpubVersion3>::new();
//! builder
//!     .add_metadata(MetadataItem::new("title", "Test Book"))
//!     .add_metadata(MetadataItem::new("language", "en"))
//!     .add_metadata(MetadataItem::new("identifier", "test-book"))
//!     .add_resource(
//!         ManifestItem::new("c1", "chapter_01.xhtml", "application/xhtml+xml"),
//!         b"<html>...</html>".to_vec(),
//!     )?
//!     .add_spine(SpineItem::new("c1"))
//!     .add_catalog_item(NavPoint::new("Chapter 1", "chapter_01.xhtml"));
//!
//! builder.make("output.epub")?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufReader, Cursor, Read, Seek, Write},
    marker::PhantomData,
    path::Path,
};

use indexmap::IndexMap;
use infer::Infer;
use log::{debug, warn};
use quick_xml::{
    Writer,
    escape::escape,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
    epub::EpubDoc,
    error::{EpubBuilderError, EpubError},
    types::{
        ManifestItem, MetadataItem, NAVIGATION_FILE_NAME, NCX_MIME, NavPoint, SpineItem,
    },
    utils::{ELEMENT_IN_DC_NAMESPACE, modified_time},
};

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Location of the package document in every archive this builder writes
pub const PACKAGE_PATH: &str = "EPUB/content.opf";

const NCX_FILE_NAME: &str = "toc.ncx";
const UNIQUE_ID: &str = "pub-id";

pub struct EpubVersion3;

/// EPUB Builder
///
/// Collects metadata, resources, reading order and table of contents,
/// then writes them as an EPUB 3.0 archive.
pub struct EpubBuilder<Version> {
    /// EPUB version placeholder
    epub_version: PhantomData<Version>,

    /// List of metadata items
    metadata: Vec<MetadataItem>,

    /// Manifest items keyed by id, in insertion order
    manifest: IndexMap<String, ManifestItem>,

    /// Resource bytes keyed by manifest id
    resources: HashMap<String, Vec<u8>>,

    /// List of spine items, defining the reading order
    spine: Vec<SpineItem>,

    catalog_title: String,

    /// List of catalog navigation points, hrefs relative to the package document
    catalog: Vec<NavPoint>,
}

impl EpubBuilder<EpubVersion3> {
    /// Create an empty builder
    pub fn new() -> Self {
        EpubBuilder {
            epub_version: PhantomData,

            metadata: vec![],
            manifest: IndexMap::new(),
            resources: HashMap::new(),
            spine: vec![],

            catalog_title: String::new(),
            catalog: vec![],
        }
    }

    /// Create a builder holding everything an existing book contains
    ///
    /// Metadata (except the modification timestamp, which is rewritten on
    /// every build), resources, spine and table of contents are copied.
    /// The book's own navigation document and NCX are kept as resources, so
    /// none are generated when it is written again.
    ///
    /// # Notes
    /// - Resources declared in the manifest but missing from the archive are
    ///   skipped with a warning, together with their spine entries.
    pub fn from_doc<R: Read + Seek>(doc: &mut EpubDoc<R>) -> Result<Self, EpubError> {
        let mut builder = Self::new();

        builder.metadata = doc
            .metadata
            .iter()
            .filter(|item| item.property != "dcterms:modified")
            .cloned()
            .collect();

        let items = doc.manifest.values().cloned().collect::<Vec<_>>();
        for item in items {
            let href = doc.item_name(&item);
            let data = match doc.get_item_content(&item.id) {
                Ok(data) => data,
                Err(EpubError::ResourceNotFound { resource }) => {
                    warn!("Skipping '{}': not present in the archive.", resource);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let item = ManifestItem {
                path: href.into(),
                ..item
            };
            builder.add_resource(item, data)?;
        }

        builder.spine = doc
            .spine
            .iter()
            .filter(|spine| builder.manifest.contains_key(&spine.idref))
            .cloned()
            .collect();

        let base_path = doc.base_path.to_string_lossy().to_string();
        builder.catalog_title = doc.catalog_title.clone();
        builder.catalog = relative_catalog(&doc.catalog, &base_path);

        let has_nav = builder.manifest.values().any(|item| item.has_property("nav"));
        if builder.catalog.is_empty() && !has_nav {
            warn!("The book has no table of contents, deriving one from the spine.");
            builder.catalog = builder
                .spine
                .iter()
                .filter_map(|spine| builder.manifest.get(&spine.idref))
                .map(|item| {
                    let href = item.path.to_string_lossy().to_string();
                    let label = href.rsplit('/').next().unwrap_or(&href).to_string();
                    NavPoint::new(&label, &href)
                })
                .collect();
        }

        Ok(builder)
    }

    /// Add metadata item
    ///
    /// Required metadata includes title, language, and identifier.
    /// Missing this data will result in an error when building the epub file.
    pub fn add_metadata(&mut self, item: MetadataItem) -> &mut Self {
        self.metadata.push(item);
        self
    }

    /// Replace every metadata item of `property` with the given values
    ///
    /// Old items of that property are removed together with their refinements.
    /// A new identifier is always the package's unique identifier.
    pub fn set_metadata(&mut self, property: &str, values: &[&str]) -> &mut Self {
        self.metadata.retain(|item| item.property != property);

        for (index, value) in values.iter().enumerate() {
            let mut item = MetadataItem::new(property, value);
            if property == "identifier" && index == 0 {
                item = item.with_id(UNIQUE_ID);
            }
            self.metadata.push(item);
        }

        self
    }

    /// Add a resource held in memory
    ///
    /// # Parameters
    /// - `manifest_item`: Manifest entry; its `path` is the href relative to the package document
    /// - `data`: Resource content
    ///
    /// # Return
    /// - `Ok(&mut Self)`: Successful addition
    /// - `Err(EpubError)`: The id is already used or the path leaves the package directory
    pub fn add_resource(
        &mut self,
        manifest_item: ManifestItem,
        data: Vec<u8>,
    ) -> Result<&mut Self, EpubError> {
        let href = manifest_item.path.to_string_lossy();
        if href.starts_with("../") || href.starts_with('/') {
            return Err(EpubBuilderError::IllegalManifestPath {
                manifest_id: manifest_item.id.clone(),
            }
            .into());
        }

        if self.manifest.contains_key(&manifest_item.id) {
            return Err(EpubBuilderError::DuplicateManifestId {
                manifest_id: manifest_item.id.clone(),
            }
            .into());
        }

        debug!("Adding resource '{}' ({} bytes)", manifest_item.id, data.len());
        self.resources.insert(manifest_item.id.clone(), data);
        self.manifest.insert(manifest_item.id.clone(), manifest_item);
        Ok(self)
    }

    /// Add a resource read from the local file system
    ///
    /// The media type is recognized from the file content and replaces the
    /// one in `manifest_item`. When the content cannot be recognized, the
    /// declared media type is kept if there is one.
    ///
    /// # Return
    /// - `Ok(&mut Self)`: Successful addition
    /// - `Err(EpubError)`: The source is not a file, cannot be read, or its type is unknown
    pub fn add_manifest_file<P: AsRef<Path>>(
        &mut self,
        source: P,
        manifest_item: ManifestItem,
    ) -> Result<&mut Self, EpubError> {
        let source = source.as_ref();
        if !source.is_file() {
            return Err(EpubBuilderError::TargetIsNotFile {
                target_path: source.to_string_lossy().to_string(),
            }
            .into());
        }

        let extension = match source.extension() {
            Some(ext) => ext.to_string_lossy().to_lowercase(),
            None => String::new(),
        };

        let buf = fs::read(source)?;
        let mime = match Infer::new().get(&buf) {
            Some(infer_mime) => refine_mime_type(infer_mime.mime_type(), &extension),
            None if !manifest_item.mime.is_empty() => manifest_item.mime.clone(),
            None => {
                return Err(EpubBuilderError::UnknownFileFormat {
                    file_path: source.to_string_lossy().to_string(),
                }
                .into());
            }
        };

        self.add_resource(ManifestItem { mime, ..manifest_item }, buf)
    }

    /// Add spine item
    pub fn add_spine(&mut self, item: SpineItem) -> &mut Self {
        self.spine.push(item);
        self
    }

    pub fn set_catalog_title(&mut self, title: &str) -> &mut Self {
        self.catalog_title = title.to_string();
        self
    }

    /// Add catalog item to the end of the existing list
    pub fn add_catalog_item(&mut self, item: NavPoint) -> &mut Self {
        self.catalog.push(item);
        self
    }

    /// Replace the whole catalog
    pub fn set_catalog(&mut self, catalog: Vec<NavPoint>) -> &mut Self {
        self.catalog = catalog;
        self
    }

    /// Builds an EPUB file and saves it to the specified path
    ///
    /// Missing parent directories of `output_path` are created.
    ///
    /// # Error conditions
    /// - Missing title, language or identifier
    /// - No navigation document and an empty catalog
    /// - More than one item with the `nav` property
    /// - A spine item or fallback pointing at an unknown manifest item,
    ///   or a circular fallback chain
    pub fn make<P: AsRef<Path>>(mut self, output_path: P) -> Result<(), EpubError> {
        self.validate_metadata()?;
        self.validate_manifest_fallback_chains()?;
        self.validate_spine()?;

        // The navigation document has to exist before the package document lists it
        self.make_navigation_document()?;
        self.make_ncx()?;

        let container = Self::make_container_xml()?;
        let package = self.make_opf_file()?;

        if let Some(parent) = output_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(output_path)?;
        let mut zip = ZipWriter::new(file);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(&container)?;

        zip.start_file(PACKAGE_PATH, deflated)?;
        zip.write_all(&package)?;

        let package_dir = package_dir();
        for (id, item) in &self.manifest {
            let target_path = format!("{}/{}", package_dir, item.path.to_string_lossy());
            let data = self.resources.get(id).map(Vec::as_slice).unwrap_or_default();

            zip.start_file(target_path, deflated)?;
            zip.write_all(data)?;
        }

        zip.finish()?;
        Ok(())
    }

    /// Builds an EPUB file and returns it parsed as an `EpubDoc`
    pub fn build<P: AsRef<Path>>(
        self,
        output_path: P,
    ) -> Result<EpubDoc<BufReader<File>>, EpubError> {
        self.make(&output_path)?;

        EpubDoc::new(output_path)
    }

    fn make_container_xml() -> Result<Vec<u8>, EpubError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        writer.write_event(Event::Start(BytesStart::new("container").with_attributes(
            [
                ("version", "1.0"),
                ("xmlns", "urn:oasis:names:tc:opendocument:xmlns:container"),
            ],
        )))?;
        writer.write_event(Event::Start(BytesStart::new("rootfiles")))?;
        writer.write_event(Event::Empty(BytesStart::new("rootfile").with_attributes([
            ("full-path", PACKAGE_PATH),
            ("media-type", "application/oebps-package+xml"),
        ])))?;
        writer.write_event(Event::End(BytesEnd::new("rootfiles")))?;
        writer.write_event(Event::End(BytesEnd::new("container")))?;

        Ok(writer.into_inner().into_inner())
    }

    /// Creates the navigation document unless the manifest already has one
    fn make_navigation_document(&mut self) -> Result<(), EpubError> {
        let nav_count = self
            .manifest
            .values()
            .filter(|item| item.has_property("nav"))
            .count();
        match nav_count {
            0 => {}
            1 => return Ok(()),
            _ => return Err(EpubBuilderError::TooManyNavFlags.into()),
        }

        if self.catalog.is_empty() {
            return Err(EpubBuilderError::NavigationInfoUninitalized.into());
        }

        let title = self.display_catalog_title();
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::DocType(BytesText::from_escaped("html")))?;
        writer.write_event(Event::Start(BytesStart::new("html").with_attributes([
            ("xmlns", "http://www.w3.org/1999/xhtml"),
            ("xmlns:epub", "http://www.idpf.org/2007/ops"),
        ])))?;

        // make head
        writer.write_event(Event::Start(BytesStart::new("head")))?;
        writer.write_event(Event::Start(BytesStart::new("title")))?;
        writer.write_event(Event::Text(BytesText::new(&title)))?;
        writer.write_event(Event::End(BytesEnd::new("title")))?;
        writer.write_event(Event::End(BytesEnd::new("head")))?;

        // make body
        writer.write_event(Event::Start(BytesStart::new("body")))?;
        writer.write_event(Event::Start(
            BytesStart::new("nav").with_attributes([("epub:type", "toc"), ("id", "toc")]),
        ))?;

        writer.write_event(Event::Start(BytesStart::new("h1")))?;
        writer.write_event(Event::Text(BytesText::new(&title)))?;
        writer.write_event(Event::End(BytesEnd::new("h1")))?;

        Self::make_nav(&mut writer, &self.catalog)?;

        writer.write_event(Event::End(BytesEnd::new("nav")))?;
        writer.write_event(Event::End(BytesEnd::new("body")))?;
        writer.write_event(Event::End(BytesEnd::new("html")))?;

        let id = self.free_id("nav");
        self.add_resource(
            ManifestItem::new(&id, NAVIGATION_FILE_NAME, "application/xhtml+xml")
                .with_properties("nav"),
            writer.into_inner().into_inner(),
        )?;

        Ok(())
    }

    fn make_nav(writer: &mut XmlWriter, navigations: &[NavPoint]) -> Result<(), EpubError> {
        writer.write_event(Event::Start(BytesStart::new("ol")))?;

        for nav in navigations {
            writer.write_event(Event::Start(BytesStart::new("li")))?;

            if let Some(path) = &nav.content {
                writer.write_event(Event::Start(
                    BytesStart::new("a").with_attributes([("href", path.as_str())]),
                ))?;
                writer.write_event(Event::Text(BytesText::new(nav.label.as_str())))?;
                writer.write_event(Event::End(BytesEnd::new("a")))?;
            } else {
                writer.write_event(Event::Start(BytesStart::new("span")))?;
                writer.write_event(Event::Text(BytesText::new(nav.label.as_str())))?;
                writer.write_event(Event::End(BytesEnd::new("span")))?;
            }

            if !nav.children.is_empty() {
                Self::make_nav(writer, &nav.children)?;
            }

            writer.write_event(Event::End(BytesEnd::new("li")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("ol")))?;

        Ok(())
    }

    /// Creates the EPUB 2 NCX unless the manifest already has one
    ///
    /// Nothing is generated for an empty catalog; the package is then
    /// navigable through its navigation document only.
    fn make_ncx(&mut self) -> Result<(), EpubError> {
        if self.manifest.values().any(|item| item.mime == NCX_MIME) || self.catalog.is_empty() {
            return Ok(());
        }

        let uid = self.unique_identifier().unwrap_or_default();
        let depth = catalog_depth(&self.catalog).to_string();
        let title = self.display_catalog_title();

        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("ncx").with_attributes([
            ("xmlns", "http://www.daisy.org/z3986/2005/ncx/"),
            ("version", "2005-1"),
        ])))?;

        writer.write_event(Event::Start(BytesStart::new("head")))?;
        for (name, content) in [
            ("dtb:uid", uid.as_str()),
            ("dtb:depth", depth.as_str()),
            ("dtb:totalPageCount", "0"),
            ("dtb:maxPageNumber", "0"),
        ] {
            writer.write_event(Event::Empty(
                BytesStart::new("meta").with_attributes([("name", name), ("content", content)]),
            ))?;
        }
        writer.write_event(Event::End(BytesEnd::new("head")))?;

        writer.write_event(Event::Start(BytesStart::new("docTitle")))?;
        writer.write_event(Event::Start(BytesStart::new("text")))?;
        writer.write_event(Event::Text(BytesText::new(&title)))?;
        writer.write_event(Event::End(BytesEnd::new("text")))?;
        writer.write_event(Event::End(BytesEnd::new("docTitle")))?;

        writer.write_event(Event::Start(BytesStart::new("navMap")))?;
        let mut play_order = 0;
        Self::make_nav_points(&mut writer, &self.catalog, &mut play_order)?;
        writer.write_event(Event::End(BytesEnd::new("navMap")))?;
        writer.write_event(Event::End(BytesEnd::new("ncx")))?;

        let id = self.free_id("ncx");
        self.add_resource(
            ManifestItem::new(&id, NCX_FILE_NAME, NCX_MIME),
            writer.into_inner().into_inner(),
        )?;

        Ok(())
    }

    fn make_nav_points(
        writer: &mut XmlWriter,
        navigations: &[NavPoint],
        play_order: &mut usize,
    ) -> Result<(), EpubError> {
        for nav in navigations {
            *play_order += 1;
            let order = play_order.to_string();
            let id = format!("navpoint-{}", order);
            let src = first_content(nav).unwrap_or_default();

            writer.write_event(Event::Start(
                BytesStart::new("navPoint")
                    .with_attributes([("id", id.as_str()), ("playOrder", order.as_str())]),
            ))?;
            writer.write_event(Event::Start(BytesStart::new("navLabel")))?;
            writer.write_event(Event::Start(BytesStart::new("text")))?;
            writer.write_event(Event::Text(BytesText::new(nav.label.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new("text")))?;
            writer.write_event(Event::End(BytesEnd::new("navLabel")))?;
            writer.write_event(Event::Empty(
                BytesStart::new("content").with_attributes([("src", src.as_str())]),
            ))?;

            Self::make_nav_points(writer, &nav.children, play_order)?;

            writer.write_event(Event::End(BytesEnd::new("navPoint")))?;
        }

        Ok(())
    }

    /// Creates the package document
    fn make_opf_file(&mut self) -> Result<Vec<u8>, EpubError> {
        let unique_id = self.assign_unique_identifier();
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        writer.write_event(Event::Start(BytesStart::new("package").with_attributes([
            ("xmlns", "http://www.idpf.org/2007/opf"),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
            ("xmlns:opf", "http://www.idpf.org/2007/opf"),
            ("unique-identifier", unique_id.as_str()),
            ("version", "3.0"),
        ])))?;

        self.make_opf_metadata(&mut writer)?;
        self.make_opf_manifest(&mut writer)?;
        self.make_opf_spine(&mut writer)?;

        writer.write_event(Event::End(BytesEnd::new("package")))?;

        Ok(writer.into_inner().into_inner())
    }

    fn make_opf_metadata(&mut self, writer: &mut XmlWriter) -> Result<(), EpubError> {
        self.metadata
            .push(MetadataItem::new("dcterms:modified", &modified_time()));

        writer.write_event(Event::Start(BytesStart::new("metadata")))?;

        for (index, metadata) in self.metadata.iter().enumerate() {
            if !ELEMENT_IN_DC_NAMESPACE.contains(&metadata.property.as_str()) {
                Self::make_meta(writer, metadata)?;
                continue;
            }

            // EPUB 2 attributes such as `opf:scheme` stay attributes,
            // everything else becomes a refining <meta>
            let (attribute_refinements, meta_refinements): (Vec<_>, Vec<_>) = metadata
                .refined
                .iter()
                .partition(|refinement| refinement.property.starts_with("opf:"));

            let id = match (&metadata.id, meta_refinements.is_empty()) {
                (Some(id), _) => Some(id.clone()),
                (None, false) => Some(format!("meta-{}", index + 1)),
                (None, true) => None,
            };

            let tag_name = format!("dc:{}", metadata.property);
            let mut start = BytesStart::new(tag_name.as_str());
            if let Some(id) = &id {
                start.push_attribute(("id", id.as_str()));
            }
            if let Some(lang) = &metadata.lang {
                start.push_attribute(("xml:lang", lang.as_str()));
            }
            for refinement in &attribute_refinements {
                start.push_attribute((refinement.property.as_str(), refinement.value.as_str()));
            }

            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(metadata.value.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(tag_name.as_str())))?;

            if let Some(id) = &id {
                let refines = format!("#{}", id);
                for refinement in &meta_refinements {
                    let mut start = BytesStart::new("meta").with_attributes([
                        ("refines", refines.as_str()),
                        ("property", refinement.property.as_str()),
                    ]);
                    if let Some(scheme) = &refinement.scheme {
                        start.push_attribute(("scheme", scheme.as_str()));
                    }

                    writer.write_event(Event::Start(start))?;
                    writer.write_event(Event::Text(BytesText::new(refinement.value.as_str())))?;
                    writer.write_event(Event::End(BytesEnd::new("meta")))?;
                }
            }
        }

        writer.write_event(Event::End(BytesEnd::new("metadata")))?;

        Ok(())
    }

    /// Writes a non Dublin Core item
    ///
    /// Prefixed properties (`dcterms:modified`) use the EPUB 3 form, plain
    /// names (`cover`) keep the EPUB 2 `name`/`content` form.
    fn make_meta(writer: &mut XmlWriter, metadata: &MetadataItem) -> Result<(), EpubError> {
        if metadata.property.contains(':') {
            let mut start =
                BytesStart::new("meta").with_attributes([("property", metadata.property.as_str())]);
            if let Some(id) = &metadata.id {
                start.push_attribute(("id", id.as_str()));
            }

            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(metadata.value.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new("meta")))?;
        } else {
            writer.write_event(Event::Empty(BytesStart::new("meta").with_attributes([
                ("name", metadata.property.as_str()),
                ("content", metadata.value.as_str()),
            ])))?;
        }

        Ok(())
    }

    fn make_opf_manifest(&self, writer: &mut XmlWriter) -> Result<(), EpubError> {
        writer.write_event(Event::Start(BytesStart::new("manifest")))?;

        for manifest in self.manifest.values() {
            let href = manifest.path.to_string_lossy();
            let mut start = BytesStart::new("item").with_attributes([
                ("id", manifest.id.as_str()),
                ("href", &*href),
                ("media-type", manifest.mime.as_str()),
            ]);
            if let Some(properties) = &manifest.properties {
                start.push_attribute(("properties", properties.as_str()));
            }
            if let Some(fallback) = &manifest.fallback {
                start.push_attribute(("fallback", fallback.as_str()));
            }

            writer.write_event(Event::Empty(start))?;
        }

        writer.write_event(Event::End(BytesEnd::new("manifest")))?;

        Ok(())
    }

    fn make_opf_spine(&self, writer: &mut XmlWriter) -> Result<(), EpubError> {
        let mut start = BytesStart::new("spine");
        if let Some(ncx) = self.manifest.values().find(|item| item.mime == NCX_MIME) {
            start.push_attribute(("toc", ncx.id.as_str()));
        }
        writer.write_event(Event::Start(start))?;

        for spine in &self.spine {
            let mut start = BytesStart::new("itemref").with_attributes([("idref", spine.idref.as_str())]);
            if let Some(id) = &spine.id {
                start.push_attribute(("id", id.as_str()));
            }
            if !spine.linear {
                start.push_attribute(("linear", "no"));
            }
            if let Some(properties) = &spine.properties {
                start.push_attribute(("properties", properties.as_str()));
            }

            writer.write_event(Event::Empty(start))?;
        }

        writer.write_event(Event::End(BytesEnd::new("spine")))?;

        Ok(())
    }

    /// Check that title, language and identifier are present
    fn validate_metadata(&self) -> Result<(), EpubError> {
        let has = |property: &str| {
            self.metadata
                .iter()
                .any(|item| item.property == property && !item.value.trim().is_empty())
        };

        if has("title") && has("language") && has("identifier") {
            Ok(())
        } else {
            Err(EpubBuilderError::MissingNecessaryMetadata.into())
        }
    }

    fn validate_spine(&self) -> Result<(), EpubError> {
        match self
            .spine
            .iter()
            .find(|spine| !self.manifest.contains_key(&spine.idref))
        {
            Some(spine) => Err(EpubBuilderError::SpineItemNotFound {
                idref: spine.idref.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn validate_manifest_fallback_chains(&self) -> Result<(), EpubError> {
        for (id, item) in &self.manifest {
            if item.fallback.is_none() {
                continue;
            }

            let mut fallback_chain = Vec::new();
            self.validate_fallback_chain(id, &mut fallback_chain)?;
        }

        Ok(())
    }

    /// Recursively verify a single fallback chain for cycles and missing items
    fn validate_fallback_chain(
        &self,
        manifest_id: &str,
        fallback_chain: &mut Vec<String>,
    ) -> Result<(), EpubError> {
        if fallback_chain.iter().any(|id| id == manifest_id) {
            fallback_chain.push(manifest_id.to_string());

            return Err(EpubBuilderError::ManifestCircularReference {
                fallback_chain: fallback_chain.join("->"),
            }
            .into());
        }

        let item = self
            .manifest
            .get(manifest_id)
            .ok_or_else(|| EpubBuilderError::ManifestNotFound {
                manifest_id: manifest_id.to_string(),
            })?;

        match &item.fallback {
            Some(fallback_id) => {
                fallback_chain.push(manifest_id.to_string());
                self.validate_fallback_chain(fallback_id, fallback_chain)
            }
            None => Ok(()),
        }
    }

    /// Makes sure the first identifier carries an id and returns it
    fn assign_unique_identifier(&mut self) -> String {
        match self
            .metadata
            .iter_mut()
            .find(|item| item.property == "identifier")
        {
            Some(item) => item.id.get_or_insert_with(|| UNIQUE_ID.to_string()).clone(),
            None => UNIQUE_ID.to_string(),
        }
    }

    fn unique_identifier(&self) -> Option<String> {
        self.metadata
            .iter()
            .find(|item| item.property == "identifier")
            .map(|item| item.value.clone())
    }

    fn display_catalog_title(&self) -> String {
        if !self.catalog_title.is_empty() {
            return self.catalog_title.clone();
        }

        self.metadata
            .iter()
            .find(|item| item.property == "title")
            .map(|item| item.value.clone())
            .unwrap_or_default()
    }

    /// Returns `base` if no manifest item uses it, otherwise `base-2`, `base-3`, ...
    fn free_id(&self, base: &str) -> String {
        let mut id = base.to_string();
        let mut counter = 1;
        while self.manifest.contains_key(&id) {
            counter += 1;
            id = format!("{}-{}", base, counter);
        }
        id
    }
}

impl Default for EpubBuilder<EpubVersion3> {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory of the package document inside the archive
fn package_dir() -> &'static str {
    PACKAGE_PATH.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn catalog_depth(catalog: &[NavPoint]) -> usize {
    catalog
        .iter()
        .map(|nav| 1 + catalog_depth(&nav.children))
        .max()
        .unwrap_or(0)
}

fn first_content(nav: &NavPoint) -> Option<String> {
    nav.content
        .clone()
        .or_else(|| nav.children.iter().find_map(first_content))
}

/// Rewrites container paths of a parsed catalog as hrefs relative to `base_path`
fn relative_catalog(catalog: &[NavPoint], base_path: &str) -> Vec<NavPoint> {
    catalog
        .iter()
        .map(|nav| NavPoint {
            label: nav.label.clone(),
            content: nav.content.as_ref().map(|content| {
                match content.strip_prefix(base_path) {
                    Some(rest) if !base_path.is_empty() => rest.trim_start_matches('/').to_string(),
                    _ => content.clone(),
                }
            }),
            children: relative_catalog(&nav.children, base_path),
            play_order: nav.play_order,
        })
        .collect()
}

/// Wraps a body fragment into a complete XHTML content document
///
/// ## Parameters
/// - `title`: Document title, escaped before it is written
/// - `body`: Markup placed inside `<body>` as is
/// - `stylesheet`: Optional href of a stylesheet to link
pub fn xhtml_document(title: &str, body: &str, stylesheet: Option<&str>) -> String {
    let link = match stylesheet {
        Some(href) => format!(
            "\n    <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>",
            escape(href)
        ),
        None => String::new(),
    };

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head>\n    <meta charset=\"UTF-8\"/>\n    <title>{}</title>{}\n</head>\n\
         <body>\n{}\n</body>\n\
         </html>\n",
        escape(title),
        link,
        body
    )
}

/// Refine the mime type
///
/// Optimize mime types inferred from file content based on file extensions
fn refine_mime_type(infer_mime: &str, extension: &str) -> String {
    match (infer_mime, extension) {
        ("text/xml", "xhtml")
        | ("application/xml", "xhtml")
        | ("text/xml", "xht")
        | ("application/xml", "xht") => "application/xhtml+xml".to_string(),

        ("text/xml", "ncx") | ("application/xml", "ncx") => NCX_MIME.to_string(),

        ("text/plain", "css") => "text/css".to_string(),
        ("text/plain", "svg") | ("text/xml", "svg") => "image/svg+xml".to_string(),

        _ => infer_mime.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        builder::{EpubBuilder, EpubVersion3, refine_mime_type, xhtml_document},
        epub::EpubDoc,
        error::{EpubBuilderError, EpubError},
        types::{ItemKind, ManifestItem, MetadataItem, MetadataRefinement, NavPoint, SpineItem},
    };

    fn chapter(title: &str) -> Vec<u8> {
        xhtml_document(title, &format!("<h1>{}</h1><p>content</p>", title), None).into_bytes()
    }

    fn sample_builder() -> EpubBuilder<EpubVersion3> {
        let mut builder = EpubBuilder::<EpubVersion3>::new();
        builder
            .add_metadata(MetadataItem::new("title", "测试书籍"))
            .add_metadata(MetadataItem::new("creator", "作者甲"))
            .add_metadata(MetadataItem::new("creator", "作者乙"))
            .add_metadata(MetadataItem::new("language", "zh-CN"))
            .add_metadata(
                MetadataItem::new("identifier", "9787111111111")
                    .with_refinement(MetadataRefinement::new("opf:scheme", "ISBN")),
            )
            .add_metadata(MetadataItem::new("cover", "cover-img"));

        for (id, name, title) in [
            ("c2", "text/chapter_02.xhtml", "第二章"),
            ("c1", "text/chapter_01.xhtml", "第一章"),
        ] {
            builder
                .add_resource(
                    ManifestItem::new(id, name, "application/xhtml+xml"),
                    chapter(title),
                )
                .unwrap();
        }
        builder
            .add_resource(ManifestItem::new("css", "style.css", "text/css"), b"p {}".to_vec())
            .unwrap()
            .add_spine(SpineItem::new("c1"))
            .add_spine(SpineItem::new("c2").non_linear())
            .add_catalog_item(NavPoint::new("第一章", "text/chapter_01.xhtml"))
            .add_catalog_item(NavPoint::new("第二章", "text/chapter_02.xhtml"));

        builder
    }

    /// A built book reopens with the same metadata, manifest order and spine
    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = sample_builder().build(dir.path().join("book.epub")).unwrap();

        assert_eq!(doc.get_title().unwrap(), vec!["测试书籍"]);
        assert_eq!(
            doc.get_metadata_value("creator").unwrap(),
            vec!["作者甲", "作者乙"]
        );
        assert_eq!(doc.unique_identifier.as_deref(), Some("9787111111111"));
        assert!(doc.get_metadata("identifier").unwrap()[0].mentions_isbn());
        assert_eq!(doc.first_metadata_value("cover").as_deref(), Some("cover-img"));
        assert!(doc.first_metadata_value("dcterms:modified").is_some());

        let items = doc.items();
        let names = items.iter().map(|item| item.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "text/chapter_02.xhtml",
                "text/chapter_01.xhtml",
                "style.css",
                "nav.xhtml",
                "toc.ncx"
            ]
        );
        assert_eq!(items[3].kind, ItemKind::Navigation);
        assert_eq!(items[4].kind, ItemKind::Navigation);

        let spine = doc.spine.iter().map(|s| (s.idref.as_str(), s.linear)).collect::<Vec<_>>();
        assert_eq!(spine, vec![("c1", true), ("c2", false)]);
        assert_eq!(doc.spine_toc.as_deref(), Some("ncx"));

        assert_eq!(doc.catalog_title, "测试书籍");
        assert_eq!(doc.catalog.len(), 2);
        assert_eq!(
            doc.catalog[0].content.as_deref(),
            Some("EPUB/text/chapter_01.xhtml")
        );
    }

    /// The mimetype entry comes first and is stored uncompressed
    #[test]
    fn test_mimetype_first_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        sample_builder().make(&path).unwrap();

        let mut archive = zip::ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), zip::CompressionMethod::Stored);
    }

    #[test]
    fn test_set_metadata_replaces_all_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = sample_builder();
        builder
            .set_metadata("creator", &["新作者"])
            .set_metadata("identifier", &["new-id"]);

        let doc = builder.build(dir.path().join("book.epub")).unwrap();
        assert_eq!(doc.get_metadata_value("creator").unwrap(), vec!["新作者"]);
        assert_eq!(doc.get_metadata_value("identifier").unwrap(), vec!["new-id"]);
        assert_eq!(doc.unique_identifier.as_deref(), Some("new-id"));
        assert!(!doc.get_metadata("identifier").unwrap()[0].mentions_isbn());
    }

    /// Seeding from a book keeps its navigation instead of generating a second one
    #[test]
    fn test_from_doc_keeps_resources_and_navigation() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.epub");
        let second = dir.path().join("second.epub");

        let mut doc = sample_builder().build(&first).unwrap();
        let mut builder = EpubBuilder::from_doc(&mut doc).unwrap();
        builder.set_metadata("title", &["新书名"]);
        let mut doc = builder.build(&second).unwrap();

        assert_eq!(doc.get_title().unwrap(), vec!["新书名"]);
        assert_eq!(doc.get_metadata_value("creator").unwrap().len(), 2);
        assert_eq!(doc.get_metadata_value("dcterms:modified").unwrap().len(), 1);
        assert_eq!(doc.items_of_kind(ItemKind::Navigation).len(), 2);
        assert_eq!(doc.catalog.len(), 2);
        assert_eq!(doc.get_item_content("css").unwrap(), b"p {}");
        assert_eq!(doc.get_item_content("c1").unwrap(), chapter("第一章"));
    }

    #[test]
    fn test_missing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = sample_builder();
        builder.set_metadata("language", &[]);

        let result = builder.make(dir.path().join("book.epub"));
        assert_eq!(
            result.unwrap_err(),
            EpubError::from(EpubBuilderError::MissingNecessaryMetadata)
        );
    }

    #[test]
    fn test_navigation_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = sample_builder();
        builder.set_catalog(vec![]);

        let result = builder.make(dir.path().join("book.epub"));
        assert_eq!(
            result.unwrap_err(),
            EpubError::from(EpubBuilderError::NavigationInfoUninitalized)
        );
    }

    #[test]
    fn test_too_many_nav_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = sample_builder();
        for id in ["nav-a", "nav-b"] {
            builder
                .add_resource(
                    ManifestItem::new(id, &format!("{}.xhtml", id), "application/xhtml+xml")
                        .with_properties("nav"),
                    chapter(id),
                )
                .unwrap();
        }

        let result = builder.make(dir.path().join("book.epub"));
        assert_eq!(
            result.unwrap_err(),
            EpubError::from(EpubBuilderError::TooManyNavFlags)
        );
    }

    #[test]
    fn test_add_resource_rejections() {
        let mut builder = sample_builder();

        let duplicate = builder.add_resource(
            ManifestItem::new("c1", "other.xhtml", "application/xhtml+xml"),
            vec![],
        );
        assert_eq!(
            duplicate.err(),
            Some(EpubError::from(EpubBuilderError::DuplicateManifestId {
                manifest_id: "c1".to_string()
            }))
        );

        let escaping = builder.add_resource(
            ManifestItem::new("x", "../outside.xhtml", "application/xhtml+xml"),
            vec![],
        );
        assert_eq!(
            escaping.err(),
            Some(EpubError::from(EpubBuilderError::IllegalManifestPath {
                manifest_id: "x".to_string()
            }))
        );
    }

    #[test]
    fn test_spine_must_reference_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = sample_builder();
        builder.add_spine(SpineItem::new("ghost"));

        let result = builder.make(dir.path().join("book.epub"));
        assert_eq!(
            result.unwrap_err(),
            EpubError::from(EpubBuilderError::SpineItemNotFound {
                idref: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_fallback_chains() {
        let dir = tempfile::tempdir().unwrap();

        let mut circular = sample_builder();
        circular
            .add_resource(ManifestItem::new("a", "a.svg", "image/svg+xml").with_fallback("b"), vec![])
            .unwrap()
            .add_resource(ManifestItem::new("b", "b.svg", "image/svg+xml").with_fallback("a"), vec![])
            .unwrap();
        assert_eq!(
            circular.make(dir.path().join("a.epub")).unwrap_err(),
            EpubError::from(EpubBuilderError::ManifestCircularReference {
                fallback_chain: "a->b->a".to_string()
            })
        );

        let mut dangling = sample_builder();
        dangling
            .add_resource(ManifestItem::new("a", "a.svg", "image/svg+xml").with_fallback("z"), vec![])
            .unwrap();
        assert_eq!(
            dangling.make(dir.path().join("b.epub")).unwrap_err(),
            EpubError::from(EpubBuilderError::ManifestNotFound {
                manifest_id: "z".to_string()
            })
        );
    }

    /// File content decides the media type, not the declared one
    #[test]
    fn test_add_manifest_file_sniffs_type() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("cover.bin");
        fs::write(&image, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0]).unwrap();

        let mut builder = sample_builder();
        builder
            .add_manifest_file(&image, ManifestItem::new("cover", "images/cover.png", ""))
            .unwrap();
        let doc = builder.build(dir.path().join("book.epub")).unwrap();

        assert_eq!(doc.manifest["cover"].mime, "image/png");
        assert_eq!(doc.items_of_kind(ItemKind::Image).len(), 1);

        let missing = EpubBuilder::<EpubVersion3>::new()
            .add_manifest_file(dir.path().join("absent.png"), ManifestItem::new("x", "x.png", ""))
            .map(|_| ());
        assert!(matches!(
            missing,
            Err(EpubError::EpubBuilderError {
                source: EpubBuilderError::TargetIsNotFile { .. }
            })
        ));
    }

    #[test]
    fn test_xhtml_document_escapes_title() {
        let document = xhtml_document("A & B", "<p>x</p>", Some("../style.css"));

        assert!(document.contains("<title>A &amp; B</title>"));
        assert!(document.contains("href=\"../style.css\""));
        assert!(document.contains("<body>\n<p>x</p>\n</body>"));
    }

    #[test]
    fn test_refine_mime_type() {
        assert_eq!(refine_mime_type("text/xml", "xhtml"), "application/xhtml+xml");
        assert_eq!(refine_mime_type("application/xml", "ncx"), "application/x-dtbncx+xml");
        assert_eq!(refine_mime_type("text/plain", "css"), "text/css");
        assert_eq!(refine_mime_type("image/jpeg", "jpg"), "image/jpeg");
    }
}
