//! Image export

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{error::EpubError, tools::open_book, types::ItemKind};

/// What [`extract_images`] wrote
#[derive(Debug, Default)]
pub struct ImagesReport {
    pub output_dir: PathBuf,
    pub extracted: Vec<PathBuf>,

    /// Item names that could not be written, with the reason
    pub skipped: Vec<(String, String)>,
}

/// Default output directory for the book at `epub`: `{stem}_images`
pub fn default_output_dir(epub: &Path) -> PathBuf {
    let stem = epub
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();

    PathBuf::from(format!("{}_images", stem))
}

/// Write every image of the book at `epub` into one flat directory
///
/// Images keep their base name. When that name is taken, `_1`, `_2`, ...
/// is appended to the stem. A failed write is logged and counted as
/// skipped.
pub fn extract_images<P: AsRef<Path>>(
    epub: P,
    output_dir: Option<&Path>,
) -> Result<ImagesReport, EpubError> {
    let epub = epub.as_ref();
    let mut doc = open_book(epub)?;

    let output_dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_output_dir(epub),
    };
    fs::create_dir_all(&output_dir)?;

    let mut report = ImagesReport {
        output_dir,
        ..Default::default()
    };

    for item in doc.items_of_kind(ItemKind::Image) {
        let target = free_path(&report.output_dir, item.file_name());
        let written = doc
            .get_item_content(&item.id)
            .and_then(|data| fs::write(&target, data).map_err(EpubError::from));

        match written {
            Ok(()) => {
                info!("Extracted {} to {}", item.name, target.display());
                report.extracted.push(target);
            }
            Err(err) => {
                warn!("Skipping image {}: {}", item.name, err);
                report.skipped.push((item.name.clone(), err.to_string()));
            }
        }
    }

    Ok(report)
}

/// `dir/name`, or `dir/{stem}_{k}{ext}` for the first `k` that is free
fn free_path(dir: &Path, name: &str) -> PathBuf {
    let (stem, extension) = match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    };

    let mut candidate = dir.join(name);
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}{}", stem, counter, extension));
        counter += 1;
    }

    candidate
}
