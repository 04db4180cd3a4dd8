use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, warn};
use zip::ZipArchive;

use crate::{
    error::EpubError,
    types::{
        EpubItem, EpubVersion, ItemKind, ManifestItem, MetadataItem, MetadataRefinement, NCX_MIME,
        NavPoint, SpineItem,
    },
    utils::{
        DecodeBytes, NormalizeWhitespace, XmlElement, XmlReader, compression_method_check,
        get_file_in_zip_archive, resolve_href,
    },
};

const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
const OPF_NAMESPACE: &str = "http://www.idpf.org/2007/opf";

/// EPUB document parser, representing a loaded and parsed EPUB publication
///
/// `EpubDoc` parses the container, the package document (metadata, manifest,
/// spine) and the table of contents once, then gives access to the metadata
/// and to the raw bytes of every manifest item.
///
/// Manifest items keep their declaration order, which is the order the
/// tools number chapters in.
///
/// # Potential Issues
/// - The whole package document is held in memory; resources are read from
///   the archive on demand.
/// - The generic parameter `R: Read + Seek` requires `&mut self` for every
///   resource read, so a document cannot be shared between threads.
pub struct EpubDoc<R: Read + Seek> {
    /// The structure of the epub file that actually holds it
    pub(crate) archive: ZipArchive<R>,

    /// The path to the OPF file
    pub package_path: PathBuf,

    /// The path to the directory where the opf file is located
    pub base_path: PathBuf,

    /// The epub version
    pub version: EpubVersion,

    /// The value of the identifier referenced by the package `unique-identifier`
    ///
    /// `None` when the package declares no identifier at all.
    pub unique_identifier: Option<String>,

    /// Epub metadata extracted from OPF, in declaration order
    pub metadata: Vec<MetadataItem>,

    /// The resources declared in the OPF manifest, in declaration order
    pub manifest: IndexMap<String, ManifestItem>,

    /// Physical reading order of publications extracted from OPF
    pub spine: Vec<SpineItem>,

    /// The manifest id named by the spine `toc` attribute (EPUB 2 NCX)
    pub spine_toc: Option<String>,

    /// The navigation data of the epub file
    ///
    /// Empty when the book has no table of contents or it could not be parsed.
    pub catalog: Vec<NavPoint>,

    /// The title of the catalog
    pub catalog_title: String,
}

impl<R: Read + Seek> EpubDoc<R> {
    /// Creates a new EPUB document instance from a reader
    ///
    /// # Parameters
    /// - `reader`: The data source, usually a file or memory buffer
    ///
    /// # Return
    /// - `Ok(EpubDoc<R>)`: The successfully parsed EPUB document object
    /// - `Err(EpubError)`: The data is not a zip archive, or the container or
    ///   package document is missing or malformed
    ///
    /// # Notes
    /// - A table of contents that cannot be parsed and a missing identifier
    ///   are logged as warnings; the document is still returned.
    pub fn from_reader(reader: R) -> Result<Self, EpubError> {
        // Parsing process
        // 1. Only stored and deflated entries are allowed in an OCF container
        // 2. Parse `META-INF/container.xml` to locate the OPF file
        // 3. Parse metadata, manifest and spine from the OPF file
        // 4. Parse the table of contents and resolve the unique identifier

        let mut archive = ZipArchive::new(reader)?;

        compression_method_check(&mut archive)?;

        let container =
            get_file_in_zip_archive(&mut archive, "META-INF/container.xml").map_err(|err| {
                match err {
                    EpubError::ResourceNotFound { .. } => EpubError::NonCanonicalEpub {
                        expected_file: "META-INF/container.xml".to_string(),
                    },
                    err => err,
                }
            })?;
        let package_path = Self::parse_container(container.decode()?)?;
        let base_path = package_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let package = XmlReader::parse_bytes(get_file_in_zip_archive(
            &mut archive,
            &package_path.to_string_lossy(),
        )?)?;
        let version = Self::determine_epub_version(&package)?;

        let mut doc = Self {
            archive,
            package_path,
            base_path,
            version,
            unique_identifier: None,
            metadata: vec![],
            manifest: IndexMap::new(),
            spine: vec![],
            spine_toc: None,
            catalog: vec![],
            catalog_title: String::new(),
        };

        doc.parse_metadata(Self::find_section(&package, "metadata")?)?;
        doc.parse_manifest(Self::find_section(&package, "manifest")?)?;
        doc.parse_spine(Self::find_section(&package, "spine")?)?;

        if let Err(err) = doc.parse_catalog() {
            warn!("Unable to parse the table of contents: {}", err);
        }

        doc.unique_identifier = match package.get_attr("unique-identifier") {
            Some(uid) => doc.metadata.iter().find(|item| {
                item.property == "identifier" && item.id.as_ref().is_some_and(|id| id == &uid)
            }),
            None => None,
        }
        .or_else(|| {
            doc.metadata
                .iter()
                .find(|item| item.property == "identifier")
        })
        .map(|item| item.value.clone());

        if doc.unique_identifier.is_none() {
            warn!("The package document does not declare a dc:identifier.");
        }

        Ok(doc)
    }

    /// Parse the EPUB container file (META-INF/container.xml)
    ///
    /// When multiple `rootfile` elements exist, the first one is used.
    fn parse_container(data: String) -> Result<PathBuf, EpubError> {
        let root = XmlReader::parse(&data)?;
        let rootfile = root
            .find_elements_by_name("rootfile")
            .next()
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "rootfile".to_string(),
            })?;

        let attr =
            rootfile
                .get_attr("full-path")
                .ok_or_else(|| EpubError::MissingRequiredAttribute {
                    tag: "rootfile".to_string(),
                    attribute: "full-path".to_string(),
                })?;

        Ok(PathBuf::from(attr))
    }

    fn find_section<'a>(package: &'a XmlElement, name: &str) -> Result<&'a XmlElement, EpubError> {
        package
            .find_elements_by_name(name)
            .next()
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: name.to_string(),
            })
    }

    /// Parse the EPUB metadata section
    ///
    /// Handles Dublin Core elements and OPF `<meta>` elements. EPUB 3
    /// `refines` metas are attached to the item they point at.
    fn parse_metadata(&mut self, metadata_element: &XmlElement) -> Result<(), EpubError> {
        let mut metadata = Vec::new();
        let mut refinements = HashMap::<String, Vec<MetadataRefinement>>::new();

        for element in metadata_element.children() {
            match element.namespace.as_deref() {
                Some(DC_NAMESPACE) => metadata.push(Self::parse_dc_element(element)),
                Some(OPF_NAMESPACE) if element.name == "meta" => {
                    Self::parse_meta_element(element, &mut metadata, &mut refinements)
                }
                _ => {}
            };
        }

        for item in metadata.iter_mut() {
            if let Some(id) = &item.id {
                if let Some(refinements) = refinements.remove(id) {
                    item.refined.extend(refinements);
                }
            }
        }

        for id in refinements.keys() {
            debug!("Dropping refinements of unknown metadata item '{}'.", id);
        }

        self.metadata = metadata;
        Ok(())
    }

    /// Parse a metadata element under the Dublin Core namespace
    ///
    /// Attributes other than `id` and the language become refinements, which
    /// is how EPUB 2 expresses things like `opf:scheme="ISBN"`.
    fn parse_dc_element(element: &XmlElement) -> MetadataItem {
        let lang = element
            .get_attr("xml:lang")
            .or_else(|| element.get_attr("lang"));

        let mut refined = element
            .attributes
            .iter()
            .filter(|(name, _)| !matches!(name.as_str(), "id" | "xml:lang" | "lang"))
            .map(|(name, value)| MetadataRefinement::new(name, &value.normalize_whitespace()))
            .collect::<Vec<_>>();
        refined.sort_by(|a, b| a.property.cmp(&b.property));

        MetadataItem {
            id: element.get_attr("id"),
            property: element.name.clone(),
            value: element.text().normalize_whitespace(),
            lang,
            refined,
        }
    }

    /// Parse an OPF `<meta>` element
    ///
    /// Both the EPUB 3 form (`property` attribute, text value) and the EPUB 2
    /// form (`name` and `content` attributes) are accepted in either version.
    fn parse_meta_element(
        element: &XmlElement,
        metadata: &mut Vec<MetadataItem>,
        refinements: &mut HashMap<String, Vec<MetadataRefinement>>,
    ) {
        if let Some(property) = element.get_attr("property") {
            let value = element.text().normalize_whitespace();
            let lang = element
                .get_attr("xml:lang")
                .or_else(|| element.get_attr("lang"));

            if let Some(refines) = element.get_attr("refines") {
                let id = refines.strip_prefix('#').unwrap_or(&refines).to_string();
                refinements.entry(id).or_default().push(MetadataRefinement {
                    property,
                    value,
                    lang,
                    scheme: element.get_attr("scheme"),
                });
            } else {
                metadata.push(MetadataItem {
                    id: element.get_attr("id"),
                    property,
                    value,
                    lang,
                    refined: vec![],
                });
            }
            return;
        }

        match (element.get_attr("name"), element.get_attr("content")) {
            (Some(name), Some(content)) => {
                metadata.push(MetadataItem::new(&name, &content.normalize_whitespace()))
            }
            _ => warn!("Skipping a <meta> element without 'property' or 'name'/'content'."),
        }
    }

    /// Parse the EPUB manifest section, keeping declaration order
    fn parse_manifest(&mut self, manifest_element: &XmlElement) -> Result<(), EpubError> {
        let mut resources = IndexMap::with_capacity(manifest_element.children.len());

        for element in manifest_element.find_children_by_name("item") {
            let id = Self::required_attr(element, "id")?;
            let href = Self::required_attr(element, "href")?;
            let mime = Self::required_attr(element, "media-type")?;

            let path = PathBuf::from(resolve_href(&self.base_path, &href)?);
            if resources.contains_key(&id) {
                warn!("Duplicate manifest id '{}', keeping the first item.", id);
                continue;
            }

            resources.insert(
                id.clone(),
                ManifestItem {
                    id,
                    path,
                    mime,
                    properties: element.get_attr("properties"),
                    fallback: element.get_attr("fallback"),
                },
            );
        }

        self.manifest = resources;
        self.validate_fallback_chains();
        Ok(())
    }

    /// Parse the EPUB spine section
    fn parse_spine(&mut self, spine_element: &XmlElement) -> Result<(), EpubError> {
        let mut spine = Vec::new();
        for element in spine_element.find_children_by_name("itemref") {
            let idref = Self::required_attr(element, "idref")?;
            if !self.manifest.contains_key(&idref) {
                warn!("Spine item '{}' does not reference a manifest item.", idref);
            }

            spine.push(SpineItem {
                idref,
                id: element.get_attr("id"),
                properties: element.get_attr("properties"),
                linear: element
                    .get_attr("linear")
                    .map(|linear| linear != "no")
                    .unwrap_or(true),
            });
        }

        self.spine = spine;
        self.spine_toc = spine_element.get_attr("toc");
        Ok(())
    }

    fn required_attr(element: &XmlElement, attribute: &str) -> Result<String, EpubError> {
        element
            .get_attr(attribute)
            .ok_or_else(|| EpubError::MissingRequiredAttribute {
                tag: element.name.clone(),
                attribute: attribute.to_string(),
            })
    }

    /// Parse the EPUB navigation information
    ///
    /// EPUB 3 books prefer the navigation document and fall back to the NCX;
    /// EPUB 2 books do the opposite.
    fn parse_catalog(&mut self) -> Result<(), EpubError> {
        let nav_path = self
            .manifest
            .values()
            .find(|item| item.has_property("nav"))
            .map(|item| item.path.clone());
        let ncx_path = self
            .spine_toc
            .as_ref()
            .and_then(|id| self.manifest.get(id))
            .or_else(|| self.manifest.values().find(|item| item.mime == NCX_MIME))
            .map(|item| item.path.clone());

        match (self.version, nav_path, ncx_path) {
            (EpubVersion::Version3_0, Some(nav), _) | (EpubVersion::Version2_0, Some(nav), None) => {
                self.parse_nav_document(&nav)
            }
            (_, _, Some(ncx)) => self.parse_ncx(&ncx),
            (_, None, None) => Err(EpubError::NonCanonicalEpub {
                expected_file: "Navigation Document".to_string(),
            }),
        }
    }

    fn parse_ncx(&mut self, ncx_path: &Path) -> Result<(), EpubError> {
        let ncx = XmlReader::parse_bytes(get_file_in_zip_archive(
            &mut self.archive,
            &ncx_path.to_string_lossy(),
        )?)?;
        let ncx_dir = ncx_path.parent().map(Path::to_path_buf).unwrap_or_default();

        match ncx.find_elements_by_name("docTitle").next() {
            Some(element) => self.catalog_title = element.text().normalize_whitespace(),
            None => warn!(
                "Expecting to get docTitle information from the ncx file, but it's missing."
            ),
        };

        let nav_map = ncx.find_elements_by_name("navMap").next().ok_or_else(|| {
            EpubError::NonCanonicalFile {
                tag: "navMap".to_string(),
            }
        })?;

        self.catalog = Self::parse_nav_points(nav_map, &ncx_dir);
        Ok(())
    }

    fn parse_nav_document(&mut self, nav_path: &Path) -> Result<(), EpubError> {
        const HEAD_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

        let nav_element = XmlReader::parse_bytes(get_file_in_zip_archive(
            &mut self.archive,
            &nav_path.to_string_lossy(),
        )?)?;
        let nav_dir = nav_path.parent().map(Path::to_path_buf).unwrap_or_default();

        let nav = nav_element
            .find_elements_by_name("nav")
            .find(|element| element.get_attr("epub:type").as_deref() == Some("toc"))
            .or_else(|| nav_element.find_elements_by_name("nav").next())
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "nav".to_string(),
            })?;

        let nav_list = nav.find_children_by_name("ol").next().ok_or_else(|| {
            EpubError::NonCanonicalFile {
                tag: "ol".to_string(),
            }
        })?;

        self.catalog = Self::parse_catalog_list(nav_list, &nav_dir)?;
        if let Some(nav_title) = nav
            .children()
            .find(|child| HEAD_TAGS.contains(&child.name.as_str()))
        {
            self.catalog_title = nav_title.text().normalize_whitespace();
        }
        Ok(())
    }

    /// Recursively parse NCX navigation points from navMap or nested navPoint elements
    fn parse_nav_points(parent_element: &XmlElement, ncx_dir: &Path) -> Vec<NavPoint> {
        let mut nav_points = Vec::new();
        for nav_point in parent_element.find_children_by_name("navPoint") {
            let label = match nav_point.find_children_by_name("navLabel").next() {
                Some(element) => element.text().normalize_whitespace(),
                None => String::new(),
            };

            let content = nav_point
                .find_children_by_name("content")
                .next()
                .and_then(|element| element.get_attr("src"))
                .map(|src| Self::resolve_nav_href(ncx_dir, &src));

            let play_order = nav_point
                .get_attr("playOrder")
                .and_then(|order| order.parse::<usize>().ok());

            nav_points.push(NavPoint {
                label,
                content,
                play_order,
                children: Self::parse_nav_points(nav_point, ncx_dir),
            });
        }

        nav_points.sort();
        nav_points
    }

    /// Recursively parses `<ol>`/`<li>` lists of a navigation document
    fn parse_catalog_list(element: &XmlElement, nav_dir: &Path) -> Result<Vec<NavPoint>, EpubError> {
        let mut catalog = Vec::new();
        for item in element.children() {
            if item.name != "li" {
                return Err(EpubError::NonCanonicalFile {
                    tag: "li".to_string(),
                });
            }

            let title_element = item
                .children()
                .find(|child| child.name == "a" || child.name == "span")
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "span/a".to_string(),
                })?;
            let content = title_element
                .get_attr("href")
                .map(|href| Self::resolve_nav_href(nav_dir, &href));
            let children = match item.find_children_by_name("ol").next() {
                Some(list) => Self::parse_catalog_list(list, nav_dir)?,
                None => vec![],
            };

            catalog.push(NavPoint {
                label: title_element.text().normalize_whitespace(),
                content,
                children,
                play_order: None,
            });
        }

        Ok(catalog)
    }

    fn resolve_nav_href(dir: &Path, href: &str) -> String {
        resolve_href(dir, href).unwrap_or_else(|err| {
            warn!("Keeping unresolvable navigation link '{}': {}", href, err);
            href.to_string()
        })
    }

    /// Determine the EPUB version
    ///
    /// The `version` attribute of the package wins; otherwise a spine `toc`
    /// attribute means EPUB 2 and a `nav` manifest item means EPUB 3.
    fn determine_epub_version(opf_element: &XmlElement) -> Result<EpubVersion, EpubError> {
        if let Some(version) = opf_element.get_attr("version") {
            match version.trim() {
                "2.0" | "2.0.1" => return Ok(EpubVersion::Version2_0),
                v if v.starts_with("3.") => return Ok(EpubVersion::Version3_0),
                _ => {}
            }
        }

        let spine_element = Self::find_section(opf_element, "spine")?;
        if spine_element.get_attr("toc").is_some() {
            return Ok(EpubVersion::Version2_0);
        }

        let manifest_element = Self::find_section(opf_element, "manifest")?;
        manifest_element
            .children()
            .any(|element| {
                element
                    .get_attr("properties")
                    .is_some_and(|properties| properties.split_whitespace().any(|p| p == "nav"))
            })
            .then_some(EpubVersion::Version3_0)
            .ok_or(EpubError::UnrecognizedEpubVersion)
    }

    /// Warns about fallback chains that are circular or point at missing items
    fn validate_fallback_chains(&self) {
        for (id, item) in &self.manifest {
            if item.fallback.is_none() {
                continue;
            }

            let mut fallback_chain = Vec::new();
            if let Err(msg) = self.validate_fallback_chain(id, &mut fallback_chain) {
                warn!("Invalid fallback chain for item {}: {}", id, msg);
            }
        }
    }

    fn validate_fallback_chain(
        &self,
        manifest_id: &str,
        fallback_chain: &mut Vec<String>,
    ) -> Result<(), String> {
        if fallback_chain.iter().any(|id| id == manifest_id) {
            fallback_chain.push(manifest_id.to_string());

            return Err(format!(
                "Circular reference detected in fallback chain for {}",
                fallback_chain.join("->")
            ));
        }

        let Some(item) = self.manifest.get(manifest_id) else {
            return Err(format!(
                "Fallback resource {} does not exist in manifest",
                manifest_id
            ));
        };

        match &item.fallback {
            Some(fallback_id) => {
                fallback_chain.push(manifest_id.to_string());
                self.validate_fallback_chain(fallback_id, fallback_chain)
            }
            None => Ok(()),
        }
    }

    /// Retrieves all metadata items with the given property, in declaration order
    ///
    /// # Return
    /// - `Some(Vec<MetadataItem>)`: All matching items, refinements included
    /// - `None`: No item carries this property
    pub fn get_metadata(&self, key: &str) -> Option<Vec<MetadataItem>> {
        let metadatas = self
            .metadata
            .iter()
            .filter(|item| item.property == key)
            .cloned()
            .collect::<Vec<MetadataItem>>();

        (!metadatas.is_empty()).then_some(metadatas)
    }

    /// Retrieves the values of all metadata items with the given property
    pub fn get_metadata_value(&self, key: &str) -> Option<Vec<String>> {
        let values = self
            .metadata
            .iter()
            .filter(|item| item.property == key)
            .map(|item| item.value.clone())
            .collect::<Vec<String>>();

        (!values.is_empty()).then_some(values)
    }

    /// The first non-empty value of a metadata property
    pub fn first_metadata_value(&self, key: &str) -> Option<String> {
        self.metadata
            .iter()
            .find(|item| item.property == key && !item.value.is_empty())
            .map(|item| item.value.clone())
    }

    /// Retrieves the titles of the publication
    ///
    /// # Return
    /// - `Ok(Vec<String>)`: All titles in declaration order
    /// - `Err(EpubError::NonCanonicalFile)`: The package declares no title
    pub fn get_title(&self) -> Result<Vec<String>, EpubError> {
        self.get_metadata_value("title")
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "title".to_string(),
            })
    }

    /// Retrieves the languages of the publication
    pub fn get_language(&self) -> Result<Vec<String>, EpubError> {
        self.get_metadata_value("language")
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "language".to_string(),
            })
    }

    /// Retrieves the identifiers of the publication
    pub fn get_identifier(&self) -> Result<Vec<String>, EpubError> {
        self.get_metadata_value("identifier")
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "identifier".to_string(),
            })
    }

    /// The href of a manifest item relative to the package document
    pub fn item_name(&self, item: &ManifestItem) -> String {
        item.path
            .strip_prefix(&self.base_path)
            .unwrap_or(&item.path)
            .to_string_lossy()
            .to_string()
    }

    /// All manifest items, classified, in declaration order
    pub fn items(&self) -> Vec<EpubItem> {
        self.manifest
            .values()
            .map(|item| {
                let name = self.item_name(item);
                EpubItem {
                    kind: ItemKind::classify(&item.mime, item.properties.as_deref(), &name),
                    id: item.id.clone(),
                    name,
                    path: item.path.clone(),
                    mime: item.mime.clone(),
                    properties: item.properties.clone(),
                }
            })
            .collect()
    }

    /// Manifest items of one kind, in declaration order
    pub fn items_of_kind(&self, kind: ItemKind) -> Vec<EpubItem> {
        self.items()
            .into_iter()
            .filter(|item| item.kind == kind)
            .collect()
    }

    /// Retrieves the raw bytes of a manifest item
    ///
    /// # Return
    /// - `Ok(Vec<u8>)`: The content of the resource
    /// - `Err(EpubError::ResourceIdNotExist)`: No manifest item has this id
    /// - `Err(EpubError::ResourceNotFound)`: The item is declared but missing from the archive
    pub fn get_item_content(&mut self, id: &str) -> Result<Vec<u8>, EpubError> {
        self.get_manifest_item(id).map(|(data, _)| data)
    }

    /// Retrieves the raw bytes of a manifest item together with its media type
    pub fn get_manifest_item(&mut self, id: &str) -> Result<(Vec<u8>, String), EpubError> {
        let resource_item = self
            .manifest
            .get(id)
            .cloned()
            .ok_or_else(|| EpubError::ResourceIdNotExist { id: id.to_string() })?;

        let data =
            get_file_in_zip_archive(&mut self.archive, &resource_item.path.to_string_lossy())?;
        Ok((data, resource_item.mime))
    }
}

impl EpubDoc<BufReader<File>> {
    /// Opens and parses the EPUB file at `path`
    ///
    /// # Return
    /// - `Ok(EpubDoc)`: The created EPUB document instance
    /// - `Err(EpubError)`: The file cannot be opened or is not a valid EPUB
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, EpubError> {
        let file = File::open(&path)?;
        Self::from_reader(BufReader::new(file))
    }
}
