//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、パス、前処理、学習ハイパーパラメータ、クラスエンコーディングを
//! JSON形式で保存・読み込みします。各処理にはこの設定を明示的に渡します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::data::{
    default_extensions, ClassEncoding, ColorSpace, DirectoryScanner, ImagePreprocessor,
    ResizeFilter, ScanOrder, ScanPolicy, TargetSize,
};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 入出力パス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// クラスごとのサブディレクトリを含む学習データ
    pub train_dir: PathBuf,
    /// チェックポイント（tar.gz）
    pub checkpoint_path: PathBuf,
    /// 学習サマリーの出力先（学習開始時に削除される）
    pub summary_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/train"),
            checkpoint_path: PathBuf::from("saved_model/cats_vs_dogs.tar.gz"),
            summary_dir: PathBuf::from("summaries"),
        }
    }
}

/// 前処理設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingSettings {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    #[serde(default)]
    pub resize_filter: ResizeFilter,
    pub batch_size: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub scan_policy: ScanPolicy,
    #[serde(default)]
    pub scan_order: ScanOrder,
    /// 指定するとクラス内の順序を再現可能にシャッフルする
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

impl Default for PreprocessingSettings {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            color_space: ColorSpace::Lab,
            resize_filter: ResizeFilter::Triangle,
            batch_size: 1,
            extensions: default_extensions(),
            scan_policy: ScanPolicy::Cycle,
            scan_order: ScanOrder::Interleave,
            shuffle_seed: None,
        }
    }
}

impl PreprocessingSettings {
    pub fn target_size(&self) -> TargetSize {
        TargetSize::new(self.width, self.height)
    }
}

/// トレーニング設定（Nesterov モーメンタム付き SGD）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// 学習率
    pub learning_rate: f64,
    /// モーメンタム係数
    pub momentum: f64,
    pub nesterov: bool,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.9,
            nesterov: true,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    pub paths: PathSettings,
    pub preprocessing: PreprocessingSettings,
    pub training: TrainingSettings,
    /// クラス名とラベルの対応
    #[serde(default)]
    pub encoding: ClassEncoding,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない場合のみデフォルト設定を返す
    ///
    /// 存在するが読めない・壊れているファイルはエラーにする。
    pub fn load_if_exists<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Ok(Self::default());
        }
        let config = Self::load(path)?;
        info!("設定ファイルを読み込みました: {}", path.display());
        Ok(config)
    }

    /// 設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {:#}",
                    path.display(),
                    e
                );
                warn!("デフォルト設定を使用します");
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// 値の範囲を検証する
    pub fn validate(&self) -> Result<()> {
        let p = &self.preprocessing;
        if p.width == 0 || p.height == 0 {
            anyhow::bail!("Target size must be positive: {}x{}", p.width, p.height);
        }
        if p.batch_size == 0 {
            anyhow::bail!("Batch size must be at least 1");
        }
        if p.extensions.is_empty() {
            anyhow::bail!("At least one image extension is required");
        }
        let t = &self.training;
        if !(t.learning_rate > 0.0) {
            anyhow::bail!("Learning rate must be positive: {}", t.learning_rate);
        }
        if !(0.0..1.0).contains(&t.momentum) {
            anyhow::bail!("Momentum must be in [0, 1): {}", t.momentum);
        }
        Ok(())
    }

    /// 設定に従った前処理器
    pub fn preprocessor(&self) -> ImagePreprocessor {
        let p = &self.preprocessing;
        ImagePreprocessor::new(p.target_size(), p.color_space)
            .with_filter(p.resize_filter)
            .with_extensions(p.extensions.clone())
    }

    /// 設定に従った学習データ走査
    pub fn scanner(&self) -> DirectoryScanner {
        let p = &self.preprocessing;
        DirectoryScanner::new(&self.paths.train_dir, self.encoding.clone())
            .with_extensions(p.extensions.clone())
            .with_policy(p.scan_policy)
            .with_order(p.scan_order)
            .with_shuffle_seed(p.shuffle_seed)
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        let p = &self.preprocessing;
        let t = &self.training;
        info!("=== アプリケーション設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("学習データ: {}", self.paths.train_dir.display());
        info!("チェックポイント: {}", self.paths.checkpoint_path.display());
        info!("サマリー: {}", self.paths.summary_dir.display());
        info!(
            "入力: {}x{} {} ({:?}), バッチサイズ: {}",
            p.width, p.height, p.color_space, p.resize_filter, p.batch_size
        );
        info!("走査: {:?} / {:?}", p.scan_policy, p.scan_order);
        info!(
            "学習率: {}, モーメンタム: {} (nesterov: {})",
            t.learning_rate, t.momentum, t.nesterov
        );
        for class in self.encoding.classes() {
            info!("クラス '{}' -> {:?} ({})", class.name, class.label, class.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.preprocessing.target_size(), TargetSize::square(256));
        assert_eq!(config.preprocessing.color_space, ColorSpace::Lab);
        assert_eq!(config.preprocessing.scan_policy, ScanPolicy::Cycle);
        assert_eq!(config.encoding.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.encoding, deserialized.encoding);
        assert_eq!(config.paths.train_dir, deserialized.paths.train_dir);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.device_type = DeviceType::Cpu;
        config.preprocessing.batch_size = 4;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.device_type, DeviceType::Cpu);
        assert_eq!(loaded.preprocessing.batch_size, 4);
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_or_default(&path);
        assert_eq!(config.preprocessing.batch_size, 1);

        let config = AppConfig::load_or_default(dir.path().join("missing.json"));
        assert_eq!(config.training.learning_rate, 0.01);
    }

    #[test]
    fn test_load_if_exists_rejects_broken_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load_if_exists(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");

        let config = AppConfig::load_if_exists(dir.path().join("missing.json")).unwrap();
        assert_eq!(config.preprocessing.batch_size, 1);

        let mut custom = AppConfig::default();
        custom.preprocessing.batch_size = 8;
        custom.save(&path).unwrap();
        assert_eq!(AppConfig::load_if_exists(&path).unwrap().preprocessing.batch_size, 8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.preprocessing.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.training.momentum = 1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.preprocessing.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_json_uses_defaults_for_optional_fields() {
        let json = r#"{
            "device_type": "Cpu",
            "paths": {"train_dir": "d", "checkpoint_path": "c.tar.gz", "summary_dir": "s"},
            "preprocessing": {"width": 64, "height": 32, "color_space": "rgb", "batch_size": 2},
            "training": {"learning_rate": 0.1, "momentum": 0.5, "nesterov": false}
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.preprocessing.extensions, default_extensions());
        assert_eq!(config.encoding, ClassEncoding::default());
        assert_eq!(config.preprocessor().image_shape(), [32, 64, 3]);
    }
}
