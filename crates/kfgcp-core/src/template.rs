//! Building a [`TargetConfiguration`] from a template file.
//!
//! Only the `imports` list is inspected; the rest of the template is passed to
//! the provider verbatim. Imported paths are assumed to live on the local
//! filesystem.

use crate::config::ConfigError;
use crate::deployment::{ImportFile, TargetConfiguration};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct TemplateHeader {
    #[serde(default)]
    imports: Vec<ImportEntry>,
}

/// One `imports` entry. Any `name` alias is ignored; the import is named by
/// its path as written.
#[derive(Debug, Deserialize)]
struct ImportEntry {
    #[serde(default)]
    path: Option<String>,
}

impl TargetConfiguration {
    /// Read a template and every import it declares.
    ///
    /// Relative import paths resolve against the template's directory. Import
    /// entries without a `path` are skipped.
    pub fn from_template(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = absolute(path.as_ref())?;
        tracing::info!(path = %path.display(), "Reading config file");
        let config = read(&path)?;

        let header: TemplateHeader = if config.trim().is_empty() {
            TemplateHeader::default()
        } else {
            serde_yaml::from_str(&config).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        };

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut imports = Vec::with_capacity(header.imports.len());
        for entry in header.imports {
            let Some(import_path) = entry.path else {
                continue;
            };
            let resolved = if Path::new(&import_path).is_absolute() {
                PathBuf::from(&import_path)
            } else {
                dir.join(&import_path)
            };
            tracing::info!(path = %resolved.display(), "Reading import file");
            let content = read(&resolved)?;
            imports.push(ImportFile {
                name: import_path,
                content,
            });
        }

        Ok(Self { config, imports })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
