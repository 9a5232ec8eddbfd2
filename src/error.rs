//! 前処理パイプラインのエラー定義

use std::path::PathBuf;

use thiserror::Error;

pub type PreprocessResult<T> = Result<T, PreprocessError>;

/// 前処理パイプラインで発生するエラー
///
/// - `PathNotFound` / `ImageDecode`: 単一画像の前処理では致命的
/// - `DirectoryNotFound`: スキャン開始時に致命的
/// - `UnsupportedFormat`: 常に回復可能（エントリをスキップするだけ）
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("path not found: {path}")]
    PathNotFound { path: PathBuf },

    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("unsupported image format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid class encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PreprocessError {
    /// スキップして処理を継続できるエラーかどうか
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PreprocessError::UnsupportedFormat { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PreprocessError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unsupported_format_is_recoverable() {
        let unsupported = PreprocessError::UnsupportedFormat {
            path: PathBuf::from("notes.txt"),
        };
        let missing = PreprocessError::PathNotFound {
            path: PathBuf::from("missing.png"),
        };
        assert!(unsupported.is_recoverable());
        assert!(!missing.is_recoverable());
    }

    #[test]
    fn test_error_display_contains_path() {
        let err = PreprocessError::DirectoryNotFound {
            path: PathBuf::from("data/train/cats"),
        };
        assert_eq!(err.to_string(), "directory not found: data/train/cats");
    }
}
