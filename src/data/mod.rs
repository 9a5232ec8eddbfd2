//! 学習データの走査と前処理
//!
//! クラスごとのサブディレクトリを持つ学習データを走査し、
//! 画像を固定解像度・[0, 1] 正規化済みの配列に変換してバッチにまとめます。

pub mod batch;
pub mod color;
pub mod encoding;
pub mod preprocessor;
pub mod scanner;

use std::path::Path;

pub use batch::{Batch, BatchBuilder, TrainingStep};
pub use color::ColorSpace;
pub use encoding::{argmax, ClassEncoding, ClassEntry};
pub use preprocessor::{
    ClassBatches, DirectoryImages, ImagePreprocessor, PreprocessedImage, ResizeFilter, TargetSize,
};
pub use scanner::{DirectoryScanner, LabeledPath, Scan, ScanOrder, ScanPolicy};

/// 対応する画像拡張子（大文字小文字は区別しない）
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

pub fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

/// 拡張子が対応リストに含まれるか
pub fn has_supported_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
