//! Configuration loading.
//!
//! `defaults/epub-toolkit.default.toml` is embedded into the binary. A user file
//! and individual overrides are layered on top of it through [`Loader`] before
//! the result is deserialized into [`Settings`].

use std::path::Path;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, ValueKind};
use serde::Deserialize;

const DEFAULT_TOML: &str = include_str!("../defaults/epub-toolkit.default.toml");

/// Top-level settings consumed by the tools.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub book: BookSettings,
    pub merge: MergeSettings,
    pub create: CreateSettings,
    pub validate: ValidateSettings,
}

/// Defaults applied to newly authored books.
#[derive(Debug, Clone, Deserialize)]
pub struct BookSettings {
    pub language: String,
    pub author: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeSettings {
    pub title: String,
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSettings {
    /// Stylesheet stored as `style.css` in created books.
    pub stylesheet: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateSettings {
    pub min_chapter_length: usize,
}

/// Layers user configuration over the built-in defaults.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    /// Start a loader seeded with the embedded defaults.
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Apply a single key/value override.
    pub fn set_override<I>(mut self, key: &str, value: I) -> Result<Self, ConfigError>
    where
        I: Into<ValueKind>,
    {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> Result<Settings, ConfigError> {
        self.builder.build()?.try_deserialize()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings built from the embedded defaults only.
pub fn load_defaults() -> Result<Settings, ConfigError> {
    Loader::new().build()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn loads_default_settings() {
        let settings = load_defaults().expect("defaults to deserialize");
        assert_eq!(settings.book.language, "zh-CN");
        assert_eq!(settings.book.author, "未知作者");
        assert_eq!(settings.merge.title, "合并的电子书");
        assert_eq!(settings.validate.min_chapter_length, 10);
        assert!(settings.create.stylesheet.contains("text-indent"));
    }

    #[test]
    fn supports_overrides() {
        let settings = Loader::new()
            .set_override("book.language", "en")
            .expect("override to apply")
            .build()
            .expect("settings to build");
        assert_eq!(settings.book.language, "en");
        assert_eq!(settings.merge.language, "zh-CN");
    }

    #[test]
    fn user_file_only_needs_changed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolkit.toml");
        fs::write(&path, "[validate]\nmin_chapter_length = 42\n").unwrap();

        let settings = Loader::new().with_file(&path).build().unwrap();
        assert_eq!(settings.validate.min_chapter_length, 42);
        assert_eq!(settings.book.author, "未知作者");
    }

    #[test]
    fn missing_user_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Loader::new().with_file(dir.path().join("absent.toml")).build();
        assert!(result.is_err());
    }
}
