//! モデルメタデータの定義
//!
//! チェックポイントに同梱され、推論・再開時に前処理とモデル形状を復元するのに使います。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{ClassEncoding, ColorSpace, ImagePreprocessor, ResizeFilter, TargetSize};
use crate::model::tensor_roles::TensorRoles;

/// メタデータのフォーマットバージョン
pub const METADATA_VERSION: u32 = 1;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub format_version: u32,

    /// 入力・ラベル・出力テンソルの役割マップ
    pub roles: TensorRoles,

    /// 学習時のクラスエンコーディング
    pub encoding: ClassEncoding,

    /// 前処理後の画像幅・高さ（ピクセル）
    pub image_width: u32,
    pub image_height: u32,

    pub color_space: ColorSpace,

    #[serde(default)]
    pub resize_filter: ResizeFilter,

    /// 直近の学習で使ったバッチサイズ
    pub batch_size: usize,

    /// 再開分を含む累計学習ステップ数
    pub steps_trained: u64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        roles: TensorRoles,
        encoding: ClassEncoding,
        preprocessor: &ImagePreprocessor,
        batch_size: usize,
        steps_trained: u64,
    ) -> Self {
        let TargetSize { width, height } = preprocessor.target_size();
        Self {
            format_version: METADATA_VERSION,
            roles,
            encoding,
            image_width: width,
            image_height: height,
            color_space: preprocessor.color_space(),
            resize_filter: preprocessor.filter(),
            batch_size,
            steps_trained,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 学習時と同じ設定の前処理器
    pub fn preprocessor(&self) -> ImagePreprocessor {
        ImagePreprocessor::new(
            TargetSize::new(self.image_width, self.image_height),
            self.color_space,
        )
        .with_filter(self.resize_filter)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        let metadata: Self =
            serde_json::from_str(json).context("Failed to deserialize metadata from JSON")?;
        if metadata.format_version != METADATA_VERSION {
            anyhow::bail!(
                "Unsupported metadata version {} (expected {})",
                metadata.format_version,
                METADATA_VERSION
            );
        }
        Ok(metadata)
    }
}
