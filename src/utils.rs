use std::{
    collections::HashMap,
    io::{Read, Seek},
    path::Path,
};

use chrono::Utc;
use quick_xml::{
    NsReader,
    escape::{resolve_predefined_entity, unescape},
    events::{BytesStart, Event},
};
use zip::{CompressionMethod, ZipArchive, result::ZipError};

use crate::error::EpubError;

pub static ELEMENT_IN_DC_NAMESPACE: std::sync::LazyLock<Vec<&str>> =
    std::sync::LazyLock::new(|| {
        vec![
            "contributor",
            "coverage",
            "creator",
            "date",
            "description",
            "format",
            "identifier",
            "language",
            "publisher",
            "relation",
            "rights",
            "source",
            "subject",
            "title",
            "type",
        ]
    });

/// Returns the current UTC time in the `CCYY-MM-DDThh:mm:ssZ` form
/// required by `dcterms:modified`
pub fn modified_time() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Extracts the contents of a specified file from a ZIP archive
///
/// ## Parameters
/// - `zip_file`: A mutable reference to a ZIP archive object
/// - `file_name`: The path to the file to extract (relative to the ZIP archive root directory)
///
/// ## Return
/// - `Ok(Vec<u8>)`: The raw bytes of the file
/// - `Err(EpubError)`: The file does not exist or an error occurred during the read operation
///
/// ## Notes
/// - The returned data is raw bytes; text files are usually decoded with [`DecodeBytes`].
pub fn get_file_in_zip_archive<R: Read + Seek>(
    zip_file: &mut ZipArchive<R>,
    file_name: &str,
) -> Result<Vec<u8>, EpubError> {
    let mut buffer = Vec::<u8>::new();
    match zip_file.by_name(file_name) {
        Ok(mut file) => {
            file.read_to_end(&mut buffer)?;
            Ok(buffer)
        }
        Err(ZipError::FileNotFound) => Err(EpubError::ResourceNotFound {
            resource: file_name.to_string(),
        }),
        Err(err) => Err(EpubError::from(err)),
    }
}

/// Checks that every entry of the container uses Stored or Deflated compression
///
/// OCF containers may only use the compression techniques of ISO/IEC 21320-1.
pub fn compression_method_check<R: Read + Seek>(
    zip_archive: &mut ZipArchive<R>,
) -> Result<(), EpubError> {
    for index in 0..zip_archive.len() {
        let file = zip_archive.by_index(index)?;

        match file.compression() {
            CompressionMethod::Stored | CompressionMethod::Deflated => continue,
            _ => {
                return Err(EpubError::UnusableCompressionMethod {
                    file: file.name().to_string(),
                    method: file.compression().to_string(),
                });
            }
        };
    }

    Ok(())
}

/// Resolves a link against the directory of the file that contains it
///
/// The result is a container path using `/` separators, with `.` and `..`
/// segments folded away. A fragment (`#...`) is kept as is. Links starting
/// with `/` are resolved from the container root.
///
/// ## Parameters
/// - `current_dir`: The directory of the referencing file, relative to the container root
/// - `href`: The link to resolve
///
/// ## Return
/// - `Ok(String)`: The normalized container path
/// - `Err(EpubError::RelativeLinkLeakage)`: The link climbs above the container root
pub fn resolve_href(current_dir: &Path, href: &str) -> Result<String, EpubError> {
    let (target, fragment) = match href.split_once('#') {
        Some((target, fragment)) => (target, Some(fragment)),
        None => (href, None),
    };

    let mut segments: Vec<String> = Vec::new();
    if !target.starts_with('/') {
        segments.extend(
            current_dir
                .components()
                .map(|component| component.as_os_str().to_string_lossy().to_string())
                .filter(|segment| !segment.is_empty() && segment != "."),
        );
    }

    for segment in target.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(EpubError::RelativeLinkLeakage {
                        path: href.to_string(),
                    });
                }
            }
            _ => segments.push(segment.to_string()),
        }
    }

    let mut path = segments.join("/");
    if let Some(fragment) = fragment {
        path.push('#');
        path.push_str(fragment);
    }
    Ok(path)
}

/// Provides functionality to decode byte data into strings
///
/// Supports UTF-8 (with or without BOM), UTF-16 BE and UTF-16 LE.
///
/// ## Notes
/// - Streams without a BOM are tried as UTF-8 first, then as UTF-16, and
///   finally decoded lossily; the result may be unreadable.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, EpubError>;
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, EpubError> {
        if self.is_empty() || self.len() < 4 {
            return Err(EpubError::EmptyDataError);
        }

        match self[0..3] {
            // UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, ..] => {
                String::from_utf8(self[3..].to_vec()).map_err(EpubError::from)
            }

            // UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, ..] => decode_utf16(&self[2..], u16::from_be_bytes),

            // UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, ..] => decode_utf16(&self[2..], u16::from_le_bytes),

            _ => {
                if let Ok(utf8_str) = String::from_utf8(self.to_vec()) {
                    return Ok(utf8_str);
                }

                if self.len() % 2 == 0 {
                    if let Ok(utf16_str) = decode_utf16(self, u16::from_be_bytes) {
                        return Ok(utf16_str);
                    }

                    if let Ok(utf16_str) = decode_utf16(self, u16::from_le_bytes) {
                        return Ok(utf16_str);
                    }
                }

                Ok(String::from_utf8_lossy(self).to_string())
            }
        }
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Result<String, EpubError> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|b| to_unit([b[0], b[1]]))
        .collect();

    String::from_utf16(&units).map_err(EpubError::from)
}

/// Collapses runs of whitespace into a single space and trims both ends
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

/// Represents an element node in an XML document
#[derive(Debug)]
pub struct XmlElement {
    /// The local name of the element (excluding namespace prefix)
    pub name: String,

    /// The namespace prefix of the element
    pub prefix: Option<String>,

    /// The namespace of the element
    pub namespace: Option<String>,

    /// The attributes of the element, keyed by their qualified name
    pub attributes: HashMap<String, String>,

    /// The text content directly inside the element, entities resolved
    pub text: Option<String>,

    /// The children of the element
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: String) -> Self {
        Self {
            name,
            prefix: None,
            namespace: None,
            attributes: HashMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Gets the text content of the element and all its child elements, trimmed
    pub fn text(&self) -> String {
        let mut result = String::new();

        if let Some(text_value) = &self.text {
            result.push_str(text_value);
        }

        for child in &self.children {
            result.push_str(&child.text());
        }

        result.trim().to_string()
    }

    pub fn get_attr(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    /// Find all elements with the specified name, the element itself included
    pub fn find_elements_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        SearchElementsByNameIter::new(self, name)
    }

    /// Find all elements with the specified name among the child elements of the current element
    pub fn find_children_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter()
    }

    fn push_text(&mut self, text: &str) {
        match self.text.as_mut() {
            Some(existing) => existing.push_str(text),
            None if !text.trim().is_empty() => self.text = Some(text.to_string()),
            None => {}
        }
    }
}

struct SearchElementsByNameIter<'a> {
    elements: Vec<&'a XmlElement>,
    current_index: usize,
    target_name: String,
}

impl<'a> SearchElementsByNameIter<'a> {
    fn new(root: &'a XmlElement, name: &str) -> Self {
        let mut elements = Vec::new();
        Self::collect_elements(root, &mut elements);
        Self {
            elements,
            current_index: 0,
            target_name: name.to_string(),
        }
    }

    fn collect_elements(element: &'a XmlElement, collection: &mut Vec<&'a XmlElement>) {
        collection.push(element);
        for child in &element.children {
            Self::collect_elements(child, collection);
        }
    }
}

impl<'a> Iterator for SearchElementsByNameIter<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_index < self.elements.len() {
            let element = self.elements[self.current_index];
            self.current_index += 1;
            if element.name == self.target_name {
                return Some(element);
            }
        }
        None
    }
}

/// XML parser used to parse XML content and build an XML element tree
pub struct XmlReader {}

impl XmlReader {
    /// Parses an XML from string and builds the root element
    ///
    /// ## Parameters
    /// - `content`: The XML string to be parsed
    ///
    /// ## Return
    /// - `Ok(XmlElement)`: The root element of the XML element tree
    /// - `Err(EpubError)`: An error occurred during parsing
    pub fn parse(content: &str) -> Result<XmlElement, EpubError> {
        if content.is_empty() {
            return Err(EpubError::EmptyDataError);
        }

        // Whitespace is significant around entity references, so text is not trimmed here
        let mut reader = NsReader::from_str(content);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut stack = Vec::<XmlElement>::new();
        let mut root = None;
        let mut namespace_map = HashMap::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,

                Ok(Event::Start(e)) => {
                    let element = Self::open_element(&e, &mut namespace_map);
                    stack.push(element);
                }

                Ok(Event::End(_)) => {
                    if let Some(element) = stack.pop() {
                        if stack.is_empty() {
                            root = Some(element);
                        } else if let Some(parent) = stack.last_mut() {
                            parent.children.push(element);
                        }
                    }
                }

                Ok(Event::Empty(e)) => {
                    let element = Self::open_element(&e, &mut namespace_map);
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }

                Ok(Event::Text(e)) => {
                    if let Some(element) = stack.last_mut() {
                        element.push_text(&String::from_utf8_lossy(e.as_ref()));
                    }
                }

                Ok(Event::GeneralRef(e)) => {
                    if let Some(element) = stack.last_mut() {
                        let name = String::from_utf8_lossy(&e).to_string();
                        match resolve_entity(&name) {
                            Some(resolved) => element.push_text(&resolved),
                            None => element.push_text(&format!("&{};", name)),
                        }
                    }
                }

                Ok(Event::CData(e)) => {
                    if let Some(element) = stack.last_mut() {
                        element.push_text(&String::from_utf8_lossy(e.as_ref()));
                    }
                }

                Err(err) => return Err(err.into()),

                // Comment, PI, Declaration, Doctype
                _ => {}
            }

            buf.clear();
        }

        if let Some(element) = root.as_mut() {
            Self::assign_namespace(element, &namespace_map);
        }

        root.ok_or(EpubError::FailedParsingXml)
    }

    /// Parse XML from bytes and builds the root element
    pub fn parse_bytes(bytes: Vec<u8>) -> Result<XmlElement, EpubError> {
        let content = bytes.decode()?;
        Self::parse(&content)
    }

    /// Builds an element from a start tag, recording namespace declarations
    fn open_element(start: &BytesStart, namespace_map: &mut HashMap<String, String>) -> XmlElement {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
        let mut element = XmlElement::new(name);

        if let Some(prefix) = start.name().prefix() {
            element.prefix = Some(String::from_utf8_lossy(prefix.as_ref()).to_string());
        }

        for attr in start.attributes().flatten() {
            let attr_key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let raw_value = String::from_utf8_lossy(&attr.value).to_string();
            let unescaped = unescape(&raw_value).map(|value| value.into_owned());
            let attr_value = unescaped.unwrap_or(raw_value);

            if attr_key == "xmlns" {
                namespace_map.insert(attr_key, attr_value);
                continue;
            }
            if let Some(prefix) = attr_key.strip_prefix("xmlns:") {
                namespace_map.insert(prefix.to_string(), attr_value);
                continue;
            }

            element.attributes.insert(attr_key, attr_value);
        }

        element
    }

    /// Assign namespace to element recursively
    fn assign_namespace(element: &mut XmlElement, namespace_map: &HashMap<String, String>) {
        if let Some(prefix) = &element.prefix {
            if let Some(namespace) = namespace_map.get(prefix) {
                element.namespace = Some(namespace.clone());
            }
        } else if let Some(namespace) = namespace_map.get("xmlns") {
            element.namespace = Some(namespace.clone());
        }

        for child in element.children.iter_mut() {
            Self::assign_namespace(child, namespace_map);
        }
    }
}

/// Resolves a predefined or numeric character entity by its name
fn resolve_entity(name: &str) -> Option<String> {
    if let Some(code) = name.strip_prefix('#') {
        let value = match code.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => code.parse::<u32>().ok()?,
        };
        return char::from_u32(value).map(String::from);
    }

    resolve_predefined_entity(name).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::{
        error::EpubError,
        utils::{DecodeBytes, NormalizeWhitespace, XmlReader, resolve_href},
    };

    /// Test with empty data
    #[test]
    fn test_decode_empty_data() {
        let data = vec![];
        let result = data.decode();
        assert_eq!(result.unwrap_err(), EpubError::EmptyDataError);
    }

    /// Test data with a length of less than 4 bytes
    #[test]
    fn test_decode_short_data() {
        let data = vec![0xEF, 0xBB];
        let result = data.decode();
        assert_eq!(result.unwrap_err(), EpubError::EmptyDataError);
    }

    #[test]
    fn test_decode_utf8_with_bom() {
        let data: Vec<u8> = vec![0xEF, 0xBB, 0xBF, b'H', b'e', b'l', b'l', b'o'];
        assert_eq!(data.decode().unwrap(), "Hello");
    }

    #[test]
    fn test_decode_utf16_with_bom() {
        let be = vec![0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        let le = vec![0xFF, 0xFE, b'H', 0x00, b'i', 0x00];

        assert_eq!(be.decode().unwrap(), "Hi");
        assert_eq!(le.decode().unwrap(), "Hi");
    }

    /// Plain UTF-8 without BOM, multi-byte characters included
    #[test]
    fn test_decode_plain_utf8() {
        let data = "第一章 Hello".as_bytes().to_vec();
        assert_eq!(data.decode().unwrap(), "第一章 Hello");
    }

    #[test]
    fn test_normalize_whitespace_trait() {
        let text = "  Hello,\tWorld!\n\nRust  ";
        assert_eq!(text.normalize_whitespace(), "Hello, World! Rust");

        let text_string = String::from("  Hello,\tWorld!\n\nRust  ");
        assert_eq!(text_string.normalize_whitespace(), "Hello, World! Rust");
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(
            resolve_href(Path::new("EPUB"), "text/c1.xhtml").unwrap(),
            "EPUB/text/c1.xhtml"
        );
        assert_eq!(
            resolve_href(Path::new("EPUB/text"), "../images/a.png").unwrap(),
            "EPUB/images/a.png"
        );
        assert_eq!(
            resolve_href(Path::new("EPUB"), "./c1.xhtml#sec").unwrap(),
            "EPUB/c1.xhtml#sec"
        );
        assert_eq!(resolve_href(Path::new("EPUB"), "/cover.xhtml").unwrap(), "cover.xhtml");
        assert_eq!(resolve_href(Path::new(""), "content.opf").unwrap(), "content.opf");
    }

    /// Links climbing above the container root are rejected
    #[test]
    fn test_resolve_href_leakage() {
        let result = resolve_href(Path::new("EPUB"), "../../secret.txt");
        assert_eq!(
            result.unwrap_err(),
            EpubError::RelativeLinkLeakage {
                path: "../../secret.txt".to_string()
            }
        );
    }

    #[test]
    fn test_xml_reader_namespaces_and_attributes() {
        let xml = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata>
    <dc:title id="t">Book</dc:title>
    <meta name="cover" content="a&amp;b"/>
  </metadata>
</package>"#;

        let root = XmlReader::parse(xml).unwrap();
        assert_eq!(root.name, "package");
        assert_eq!(root.namespace.as_deref(), Some("http://www.idpf.org/2007/opf"));

        let title = root.find_elements_by_name("title").next().unwrap();
        assert_eq!(title.prefix.as_deref(), Some("dc"));
        assert_eq!(title.namespace.as_deref(), Some("http://purl.org/dc/elements/1.1/"));
        assert_eq!(title.get_attr("id").as_deref(), Some("t"));
        assert_eq!(title.text(), "Book");

        let meta = root.find_elements_by_name("meta").next().unwrap();
        assert_eq!(meta.get_attr("content").as_deref(), Some("a&b"));
    }

    /// Entity references are resolved in place, keeping surrounding spaces
    #[test]
    fn test_xml_reader_entities() {
        let root = XmlReader::parse("<title>Tom &amp; Jerry &#x4E2D;&#25991;</title>").unwrap();
        assert_eq!(root.text(), "Tom & Jerry 中文");
    }

    #[test]
    fn test_xml_reader_without_root() {
        let result = XmlReader::parse("<?xml version=\"1.0\"?><!-- nothing -->");
        assert_eq!(result.unwrap_err(), EpubError::FailedParsingXml);
    }
}
