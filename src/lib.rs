//! 犬猫画像分類
//!
//! - `data`: 学習データの走査・前処理・バッチ化
//! - `model`: 設定、チェックポイントとメタデータ
//! - `ml`: CNNモデルの学習と推論（feature `ml`）

pub mod data;
pub mod error;
pub mod metrics;
pub mod model;
pub mod summary;

#[cfg(feature = "ml")]
pub mod ml;

pub use error::{PreprocessError, PreprocessResult};
