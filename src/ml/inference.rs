//! モデル推論機能

use anyhow::{anyhow, Result};
use burn::tensor::backend::Backend;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::data::{ImagePreprocessor, PreprocessedImage};
use crate::error::PreprocessError;
use crate::ml::ml_model::{image_tensor, load_weights, tensor_values, CatDogClassifier, ModelConfig};
use crate::model::{load_checkpoint, ModelMetadata};

/// 分類結果
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// 単一画像のラベル
    Single(String),
    /// ファイル名 -> ラベル（ファイル名順）
    Directory(BTreeMap<String, String>),
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Single(label) => write!(f, "{}", label),
            Classification::Directory(labels) => {
                for (name, label) in labels {
                    writeln!(f, "{}: {}", name, label)?;
                }
                Ok(())
            }
        }
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: CatDogClassifier<B>,
    metadata: ModelMetadata,
    preprocessor: ImagePreprocessor,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// チェックポイントを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(checkpoint_path: P, device: &B::Device) -> Result<Self> {
        let (metadata, weights) = load_checkpoint(checkpoint_path.as_ref())?;

        // 前処理は学習時の設定を復元して使う
        let preprocessor = metadata.preprocessor();
        let image_shape = metadata
            .roles
            .image_shape()
            .ok_or_else(|| anyhow!("Checkpoint role map has no fixed input shape"))?;
        if image_shape != preprocessor.image_shape() {
            anyhow::bail!(
                "Checkpoint input shape {:?} does not match its preprocessing settings {:?}",
                image_shape,
                preprocessor.image_shape()
            );
        }
        let output_len = metadata
            .roles
            .output_len()
            .ok_or_else(|| anyhow!("Checkpoint role map has no fixed output length"))?;
        if output_len != metadata.encoding.label_len() {
            anyhow::bail!(
                "Checkpoint output length {} does not match its class encoding ({})",
                output_len,
                metadata.encoding.label_len()
            );
        }

        let model_config = ModelConfig::new(output_len).with_channels(image_shape[2]);
        model_config.check_input(image_shape[0], image_shape[1])?;
        let model = load_weights(model_config.init::<B>(device), weights, device)?;

        Ok(Self {
            model,
            metadata,
            preprocessor,
            device: device.clone(),
        })
    }

    /// 前処理済み画像1枚の出力ベクトル
    pub fn predict(&self, image: &PreprocessedImage) -> Result<Vec<f32>> {
        let output = self.model.forward(image_tensor::<B>(image, &self.device));
        tensor_values(output)
    }

    fn label_for(&self, image: &PreprocessedImage) -> Result<String> {
        let output = self.predict(image)?;
        self.metadata
            .encoding
            .decode(&output)
            .map(|class| class.display().to_string())
            .ok_or_else(|| anyhow!("Model output could not be decoded: {:?}", output))
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<String> {
        let image = self.preprocessor.preprocess_image(image_path)?;
        self.label_for(&image)
    }

    /// ディレクトリ直下の画像を分類（読めない画像はスキップ）
    pub fn classify_directory<P: AsRef<Path>>(&self, dir: P) -> Result<BTreeMap<String, String>> {
        let mut results = BTreeMap::new();
        for (name, image) in self.preprocessor.preprocess_directory(dir)? {
            let label = self.label_for(&image)?;
            results.insert(name, label);
        }
        Ok(results)
    }

    /// ファイルまたはディレクトリを分類（URLは非対応）
    pub fn classify_source(&self, source: &str) -> Result<Classification> {
        if is_url(source) {
            anyhow::bail!("URL sources are not supported: {}", source);
        }
        let path = Path::new(source);
        if path.is_dir() {
            Ok(Classification::Directory(self.classify_directory(path)?))
        } else if path.exists() {
            Ok(Classification::Single(self.classify_image(path)?))
        } else {
            Err(PreprocessError::PathNotFound {
                path: path.to_path_buf(),
            }
            .into())
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

fn is_url(source: &str) -> bool {
    let lower = source.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
