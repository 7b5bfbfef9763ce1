use std::path::{Path, PathBuf};

use ferry_protocol::constants::{MAX_FILE_SIZE, SUPPORTED_EXTENSIONS};

/// Reasons a source file is rejected before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no file selected")]
    MissingFile,

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("file has no extension: {0}")]
    MissingExtension(PathBuf),

    #[error("unsupported file format {extension:?}; supported formats are: {supported}")]
    UnsupportedType {
        extension: String,
        supported: String,
    },

    #[error("file size {size} exceeds the limit of {} MB", .limit / (1024 * 1024))]
    TooLarge { size: u64, limit: u64 },
}

/// Limits applied to a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    /// Largest accepted size in bytes.
    pub max_size: u64,
    /// Accepted lowercase extensions; empty accepts any.
    pub extensions: Vec<String>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_size: MAX_FILE_SIZE,
            extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// A validated source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Lowercased extension without the dot.
    pub extension: String,
    pub size: u64,
}

/// Checks that `path` is a regular file of a supported type and size.
pub fn validate_source(path: &Path, rules: &ValidationRules) -> Result<SourceFile, ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::MissingFile);
    }

    let metadata = std::fs::metadata(path).map_err(|source| ValidationError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(ValidationError::NotAFile(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ValidationError::MissingExtension(path.to_path_buf()))?;

    if !rules.extensions.is_empty() && !rules.extensions.contains(&extension) {
        return Err(ValidationError::UnsupportedType {
            extension,
            supported: rules.extensions.join(", "),
        });
    }

    let size = metadata.len();
    if size > rules.max_size {
        return Err(ValidationError::TooLarge {
            size,
            limit: rules.max_size,
        });
    }

    Ok(SourceFile {
        path: path.to_path_buf(),
        extension,
        size,
    })
}
