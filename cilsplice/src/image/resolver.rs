//! Dependency image lookup across configured search directories.

use std::path::PathBuf;

use super::{ModuleImage, Version};
use crate::{Error, Result};

/// Locates and loads dependency images by module name and requested version.
///
/// Directories are probed in registration order; the first container whose
/// name matches wins, provided its version satisfies the request. A requested
/// version of [`Version::ANY`] accepts whatever is found.
#[derive(Debug, Default)]
pub struct ImageResolver {
    search_dirs: Vec<PathBuf>,
}

impl ImageResolver {
    /// Create a resolver with no search directories.
    #[must_use]
    pub fn new() -> Self {
        ImageResolver::default()
    }

    /// Append a directory to probe. Order matters; earlier directories win.
    pub fn add_search_dir(&mut self, dir: impl Into<PathBuf>) {
        self.search_dirs.push(dir.into());
    }

    /// The configured search directories.
    #[must_use]
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Locate and load the image for `name` at the requested `version`.
    ///
    /// # Errors
    /// Returns [`Error::ImageNotFound`] if no search directory holds a matching
    /// container, or a parse error if a candidate file is damaged.
    pub fn resolve(&self, name: &str, version: &Version) -> Result<ModuleImage> {
        let file_name = format!("{name}.cilm");
        for dir in &self.search_dirs {
            let candidate = dir.join(&file_name);
            if !candidate.is_file() {
                continue;
            }
            let image = ModuleImage::from_file(&candidate)?;
            if !version.matches(&image.version) {
                log::warn!(
                    "skipping {}: version {} does not satisfy requested {}",
                    candidate.display(),
                    image.version,
                    version
                );
                continue;
            }
            log::debug!("resolved {} {} from {}", name, image.version, candidate.display());
            return Ok(image);
        }
        Err(Error::ImageNotFound {
            name: name.to_string(),
            version: version.to_string(),
            searched: self.search_dirs.len(),
        })
    }
}
