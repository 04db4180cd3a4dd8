use std::path::PathBuf;

/// File name reserved for the EPUB 3 navigation document.
pub const NAVIGATION_FILE_NAME: &str = "nav.xhtml";

/// Media type of the EPUB 2 navigation control file.
pub const NCX_MIME: &str = "application/x-dtbncx+xml";

/// Placeholder shown for metadata fields a book does not declare.
pub const UNKNOWN_VALUE: &str = "未知";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpubVersion {
    Version2_0,
    Version3_0,
}

/// Represents a metadata item in the EPUB publication
///
/// A single piece of metadata such as title, creator, identifier or language.
/// In EPUB 3.0, metadata items can have refinements that provide additional
/// details about the main item (a creator's role, an identifier's scheme).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    /// Optional unique identifier for this metadata item
    ///
    /// In EPUB 3.0 refinements point at their parent through this ID.
    pub id: Option<String>,

    /// The metadata property name
    ///
    /// Dublin Core elements use their local name ("title", "creator", ...),
    /// `<meta>` elements use their `property` or `name` attribute.
    pub property: String,

    /// The metadata value
    pub value: String,

    /// Optional language code for this metadata item
    pub lang: Option<String>,

    /// Refinements of this metadata item
    ///
    /// In EPUB 2.x, custom attributes such as `opf:scheme` are parsed as refinements too.
    pub refined: Vec<MetadataRefinement>,
}

impl MetadataItem {
    pub fn new(property: &str, value: &str) -> Self {
        Self {
            id: None,
            property: property.to_string(),
            value: value.to_string(),
            lang: None,
            refined: vec![],
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = Some(lang.to_string());
        self
    }

    pub fn with_refinement(mut self, refinement: MetadataRefinement) -> Self {
        self.refined.push(refinement);
        self
    }

    /// Whether the value or any refinement mentions an ISBN
    pub fn mentions_isbn(&self) -> bool {
        let mentions = |text: &str| text.to_lowercase().contains("isbn");

        self.value.to_lowercase().starts_with("urn:isbn:")
            || self.refined.iter().any(|refinement| {
                mentions(&refinement.property)
                    || mentions(&refinement.value)
                    || refinement.scheme.as_deref().is_some_and(|scheme| mentions(scheme))
            })
    }
}

/// Represents a refinement of a metadata item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRefinement {
    /// The refinement property name, e.g. "role", "file-as" or "identifier-type"
    pub property: String,

    /// The refinement value
    pub value: String,

    /// Optional language code for this refinement
    pub lang: Option<String>,

    /// Optional scheme identifier, e.g. "marc:relators" or "onix:codelist5"
    pub scheme: Option<String>,
}

impl MetadataRefinement {
    pub fn new(property: &str, value: &str) -> Self {
        Self {
            property: property.to_string(),
            value: value.to_string(),
            lang: None,
            scheme: None,
        }
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = Some(scheme.to_string());
        self
    }
}

/// Represents a resource item declared in the EPUB manifest
///
/// When read by [`crate::epub::EpubDoc`] the `path` is normalized relative to
/// the root of the container. When handed to [`crate::builder::EpubBuilder`]
/// it is the `href` relative to the package document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// The unique id of the resource within the manifest
    pub id: String,

    /// The path to the resource file
    pub path: PathBuf,

    /// The media type of the resource
    pub mime: String,

    /// Optional space-separated properties, such as `nav` or `cover-image`
    pub properties: Option<String>,

    /// Optional fallback resource identifier
    ///
    /// The ID of another manifest item used when a reading system
    /// does not support the media type of this resource.
    pub fallback: Option<String>,
}

impl ManifestItem {
    pub fn new(id: &str, path: &str, mime: &str) -> Self {
        Self {
            id: id.to_string(),
            path: PathBuf::from(path),
            mime: mime.to_string(),
            properties: None,
            fallback: None,
        }
    }

    pub fn with_properties(mut self, properties: &str) -> Self {
        self.properties = Some(properties.to_string());
        self
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|properties| properties.split_whitespace().any(|p| p == property))
    }
}

/// Represents an item in the EPUB spine, defining the reading order of the publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// The ID of the manifest item this spine item references
    pub idref: String,

    /// Optional identifier for this spine item
    pub id: Option<String>,

    /// Optional space-separated properties of this spine item
    pub properties: Option<String>,

    /// Indicates whether this item is part of the linear reading order
    ///
    /// Non-linear items are supplementary content (footnotes, appendices)
    /// reached through hyperlinks rather than sequential reading.
    pub linear: bool,
}

impl SpineItem {
    pub fn new(idref: &str) -> Self {
        Self {
            idref: idref.to_string(),
            id: None,
            properties: None,
            linear: true,
        }
    }

    pub fn non_linear(mut self) -> Self {
        self.linear = false;
        self
    }
}

/// Represents a navigation point in an EPUB document's table of contents
///
/// Entries are hierarchical: a chapter may contain nested sections.
#[derive(Debug, Eq, Clone)]
pub struct NavPoint {
    /// The text displayed in the table of contents
    pub label: String,

    /// The content document this navigation point references, fragment included
    ///
    /// Read from a book it is a container path; handed to the builder it is
    /// an href relative to the package document. `None` for headings that
    /// do not link anywhere.
    pub content: Option<String>,

    /// Child navigation points (sub-sections)
    pub children: Vec<NavPoint>,

    /// The reading order position of this navigation point
    ///
    /// It can be `None` when the source did not provide one.
    pub play_order: Option<usize>,
}

impl NavPoint {
    pub fn new(label: &str, content: &str) -> Self {
        Self {
            label: label.to_string(),
            content: Some(content.to_string()),
            children: vec![],
            play_order: None,
        }
    }
}

impl Ord for NavPoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.play_order.cmp(&other.play_order)
    }
}

impl PartialOrd for NavPoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NavPoint {
    fn eq(&self, other: &Self) -> bool {
        self.play_order == other.play_order
    }
}

/// What role a manifest item plays in the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// A content document that counts as a chapter
    Document,
    Image,
    Stylesheet,
    /// The navigation document or the NCX
    Navigation,
    Other,
}

impl ItemKind {
    /// Classify a manifest item
    ///
    /// Navigation is decided before anything else, so the navigation document
    /// is never mistaken for a chapter even though it is XHTML.
    ///
    /// ## Parameters
    /// - `mime`: the declared media type
    /// - `properties`: the manifest `properties` attribute, if any
    /// - `name`: the item's href relative to the package document
    pub fn classify(mime: &str, properties: Option<&str>, name: &str) -> Self {
        let is_nav_property =
            properties.is_some_and(|properties| properties.split_whitespace().any(|p| p == "nav"));

        match mime {
            NCX_MIME => ItemKind::Navigation,
            "application/xhtml+xml" | "text/html" => {
                if is_nav_property || name == NAVIGATION_FILE_NAME {
                    ItemKind::Navigation
                } else {
                    ItemKind::Document
                }
            }
            "text/css" => ItemKind::Stylesheet,
            _ if mime.starts_with("image/") => ItemKind::Image,
            _ => ItemKind::Other,
        }
    }
}

/// A manifest item as seen by the tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpubItem {
    pub id: String,

    /// The href relative to the package document, e.g. `text/chapter_01.xhtml`
    pub name: String,

    /// The normalized path inside the container, e.g. `EPUB/text/chapter_01.xhtml`
    pub path: PathBuf,

    pub mime: String,
    pub properties: Option<String>,
    pub kind: ItemKind,
}

impl EpubItem {
    /// The last path segment of the item name
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Representation a chapter is rendered into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    /// Plain text
    #[cfg_attr(feature = "cli", value(name = "txt"))]
    Text,

    /// Markdown
    #[cfg_attr(feature = "cli", value(name = "md"))]
    Markdown,

    /// Standalone HTML document
    #[cfg_attr(feature = "cli", value(name = "html"))]
    Html,
}

impl OutputFormat {
    /// File extension used for files written in this format
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Markdown => "md",
            OutputFormat::Html => "html",
        }
    }
}

/// Book-level metadata shown at the top of each rendered chapter
///
/// Labels are fixed and kept in display order. A field the book does not
/// declare is shown as [`UNKNOWN_VALUE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
}

impl MetadataRecord {
    /// Label and display value pairs, in display order
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        fn show(value: &Option<String>) -> &str {
            match value.as_deref() {
                Some(value) if !value.trim().is_empty() => value,
                _ => UNKNOWN_VALUE,
            }
        }

        [
            ("书名", show(&self.title)),
            ("作者", show(&self.author)),
            ("语言", show(&self.language)),
            ("出版社", show(&self.publisher)),
        ]
    }
}

/// One rendered chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based position among the book's chapter documents
    pub number: usize,
    pub title: String,
    pub content: String,

    /// Name of the item the chapter was rendered from
    pub source: String,
}
