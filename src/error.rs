//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while reading,
//! converting and writing EPUB files. All errors are wrapped in the
//! `EpubError` enumeration so every tool returns the same error type.
//!
//! ## Main Error Types
//!
//! - [EpubError] - Errors raised while processing EPUB containers and tool inputs
//! - [EpubBuilderError] - Specific errors raised while writing an EPUB package

use thiserror::Error;

/// Types of errors that can occur during EPUB processing
///
/// This enumeration covers file format errors, missing resources,
/// compression issues, invalid tool input and configuration failures.
#[derive(Debug, Error)]
pub enum EpubError {
    /// The container is not a readable zip archive
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// Configuration loading error
    #[error("Config error: {source}")]
    ConfigError { source: config::ConfigError },

    /// A resource is too short to be decoded as text
    #[error("Decode error: The data is empty.")]
    EmptyDataError,

    #[error("Epub builder error: {source}")]
    EpubBuilderError { source: EpubBuilderError },

    /// An XML resource produced no root element
    #[error("Failed parsing XML error: The document does not contain a root element.")]
    FailedParsingXml,

    /// Input file missing error
    ///
    /// Raised by the tools when a path given by the caller does not exist.
    #[error("File not found: \"{path}\" does not exist.")]
    FileNotFound { path: String },

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// Report serialization error
    #[error("JSON error: {source}")]
    JsonError { source: serde_json::Error },

    /// A package element lacks an attribute the reader depends on
    #[error(
        "Missing required attribute: The \"{attribute}\" attribute is a must attribute for the \"{tag}\" element."
    )]
    MissingRequiredAttribute { tag: String, attribute: String },

    /// No chapter documents error
    ///
    /// Raised when an operation needs at least one chapter document
    /// (merge, split) but none of its inputs contain any.
    #[error("No chapters: No chapter documents were found in {source_name}.")]
    NoChapters { source_name: String },

    /// A mandatory container entry (`META-INF/container.xml`, the package
    /// document) is missing
    #[error("Non-canonical epub: The \"{expected_file}\" file was not found.")]
    NonCanonicalEpub { expected_file: String },

    /// A mandatory element (`metadata`, `manifest`, `spine`, ...) is missing
    #[error("Non-canonical file: The \"{tag}\" elements was not found.")]
    NonCanonicalFile { tag: String },

    /// An href resolves above the container root
    #[error("Relative link leakage: Path \"{path}\" is out of container range.")]
    RelativeLinkLeakage { path: String },

    /// No manifest item has the requested id
    #[error("Resource Id Not Exist: There is no resource item with id \"{id}\".")]
    ResourceIdNotExist { id: String },

    /// A manifest item points at an entry the archive does not contain
    #[error("Resource not found: Unable to find resource from \"{resource}\".")]
    ResourceNotFound { resource: String },

    /// The package declares no usable version and has neither a nav
    /// document nor an NCX to infer one from
    #[error(
        "Unrecognized EPUB version: Unable to identify version number and version characteristics from epub file"
    )]
    UnrecognizedEpubVersion,

    /// An entry is compressed with something other than stored or deflate
    #[error(
        "Unusable compression method: The \"{file}\" file uses the unsupported \"{method}\" compression method."
    )]
    UnusableCompressionMethod { file: String, method: String },

    /// UTF-8 decoding error
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },
}

impl From<zip::result::ZipError> for EpubError {
    fn from(value: zip::result::ZipError) -> Self {
        EpubError::ArchiveError { source: value }
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(value: quick_xml::Error) -> Self {
        EpubError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for EpubError {
    fn from(value: std::io::Error) -> Self {
        EpubError::IOError { source: value }
    }
}

impl From<serde_json::Error> for EpubError {
    fn from(value: serde_json::Error) -> Self {
        EpubError::JsonError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for EpubError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        EpubError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for EpubError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        EpubError::Utf16DecodeError { source: value }
    }
}

impl From<config::ConfigError> for EpubError {
    fn from(value: config::ConfigError) -> Self {
        EpubError::ConfigError { source: value }
    }
}

impl From<EpubBuilderError> for EpubError {
    fn from(value: EpubBuilderError) -> Self {
        EpubError::EpubBuilderError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for EpubError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::MissingRequiredAttribute {
                    tag: l_tag,
                    attribute: l_attribute,
                },
                Self::MissingRequiredAttribute {
                    tag: r_tag,
                    attribute: r_attribute,
                },
            ) => l_tag == r_tag && l_attribute == r_attribute,
            (Self::FileNotFound { path: l_path }, Self::FileNotFound { path: r_path }) => {
                l_path == r_path
            }
            (
                Self::NoChapters {
                    source_name: l_source,
                },
                Self::NoChapters {
                    source_name: r_source,
                },
            ) => l_source == r_source,
            (
                Self::NonCanonicalEpub {
                    expected_file: l_expected_file,
                },
                Self::NonCanonicalEpub {
                    expected_file: r_expected_file,
                },
            ) => l_expected_file == r_expected_file,
            (Self::NonCanonicalFile { tag: l_tag }, Self::NonCanonicalFile { tag: r_tag }) => {
                l_tag == r_tag
            }
            (
                Self::RelativeLinkLeakage { path: l_path },
                Self::RelativeLinkLeakage { path: r_path },
            ) => l_path == r_path,
            (Self::ResourceIdNotExist { id: l_id }, Self::ResourceIdNotExist { id: r_id }) => {
                l_id == r_id
            }
            (
                Self::ResourceNotFound {
                    resource: l_resource,
                },
                Self::ResourceNotFound {
                    resource: r_resource,
                },
            ) => l_resource == r_resource,
            (
                Self::EpubBuilderError { source: l_source },
                Self::EpubBuilderError { source: r_source },
            ) => l_source == r_source,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

/// Types of errors that can occur during EPUB build
///
/// These errors are related to the minimum package requirements the
/// writer enforces before producing an archive.
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq))]
pub enum EpubBuilderError {
    /// A resource path leaves the package directory
    #[error(
        "A manifest with id '{manifest_id}' should not use a relative path starting with '../'."
    )]
    IllegalManifestPath { manifest_id: String },

    /// Following `fallback` attributes loops back to an item already visited
    #[error("Circular reference detected in fallback chain for '{fallback_chain}'.")]
    ManifestCircularReference { fallback_chain: String },

    /// Duplicate manifest id error
    #[error("A manifest item with id '{manifest_id}' already exists.")]
    DuplicateManifestId { manifest_id: String },

    /// A `fallback` attribute names an unknown item
    #[error("Fallback resource '{manifest_id}' does not exist in manifest.")]
    ManifestNotFound { manifest_id: String },

    #[error("Requires at least one 'title', 'language', and 'identifier'.")]
    MissingNecessaryMetadata,

    /// No nav item was added and the catalog is empty
    #[error("Navigation information is not set.")]
    NavigationInfoUninitalized,

    /// Spine references an unknown manifest item
    #[error("Spine item '{idref}' does not reference a manifest item.")]
    SpineItemNotFound { idref: String },

    /// A file to import does not exist or is a directory
    #[error("Expect a file, but '{target_path}' is not a file.")]
    TargetIsNotFile { target_path: String },

    /// More than one manifest item carries the `nav` property
    #[error("There are too many items with 'nav' property in the manifest.")]
    TooManyNavFlags,

    /// Content sniffing could not determine a media type
    #[error("Unable to analyze the file '{file_path}' type.")]
    UnknownFileFormat { file_path: String },
}
