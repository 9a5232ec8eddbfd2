//! 画像の前処理とバッチ化
//!
//! 読み込み → デコード → リサイズ → 色空間変換 → [0, 1] 正規化。
//! キャッシュは持たず、呼び出しのたびにディスクから読み直します。

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::batch::{chw_from_hwc, BatchBuilder, TrainingStep};
use crate::data::color::ColorSpace;
use crate::data::encoding::ClassEncoding;
use crate::data::scanner::{DirectoryScanner, Scan};
use crate::data::{default_extensions, has_supported_extension};
use crate::error::{PreprocessError, PreprocessResult};

/// 出力解像度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self::square(256)
    }
}

/// リサイズ時の補間方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    /// バイリニア
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// 前処理済み画像（[H, W, C] 順、値は [0, 1]）
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    data: Vec<f32>,
    height: usize,
    width: usize,
    channels: usize,
}

impl PreprocessedImage {
    /// 要素数が形状と一致しなければ None
    pub fn from_raw(height: usize, width: usize, channels: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == height * width * channels).then_some(Self {
            data,
            height,
            width,
            channels,
        })
    }

    /// [H, W, C]
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, y: usize, x: usize, channel: usize) -> Option<f32> {
        if y >= self.height || x >= self.width || channel >= self.channels {
            return None;
        }
        self.data
            .get((y * self.width + x) * self.channels + channel)
            .copied()
    }

    /// [C, H, W] に並べ替えたデータ
    pub fn to_chw(&self) -> Vec<f32> {
        chw_from_hwc(&self.data, self.height, self.width, self.channels)
    }
}

/// 画像前処理器
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    target_size: TargetSize,
    color_space: ColorSpace,
    filter: ResizeFilter,
    extensions: Vec<String>,
}

impl ImagePreprocessor {
    pub fn new(target_size: TargetSize, color_space: ColorSpace) -> Self {
        Self {
            target_size,
            color_space,
            filter: ResizeFilter::default(),
            extensions: default_extensions(),
        }
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn target_size(&self) -> TargetSize {
        self.target_size
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn filter(&self) -> ResizeFilter {
        self.filter
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// 出力形状 [H, W, C]
    pub fn image_shape(&self) -> [usize; 3] {
        [
            self.target_size.height as usize,
            self.target_size.width as usize,
            self.color_space.channels(),
        ]
    }

    /// 画像1枚を前処理する
    ///
    /// 存在しなければ `PathNotFound`、画像として読めなければ `ImageDecode`。
    pub fn preprocess_image<P: AsRef<Path>>(&self, path: P) -> PreprocessResult<PreprocessedImage> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PreprocessError::PathNotFound {
                path: path.to_path_buf(),
            });
        }

        // 拡張子より中身のマジックナンバーを優先して判定
        let reader = image::ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| PreprocessError::io(path, e))?;
        let decoded = reader.decode().map_err(|source| match source {
            image::ImageError::IoError(e) => PreprocessError::io(path, e),
            source => PreprocessError::ImageDecode {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let TargetSize { width, height } = self.target_size;
        let resized = image::imageops::resize(&decoded.to_rgb8(), width, height, self.filter.into());
        let data = self.color_space.normalize(&resized);

        Ok(PreprocessedImage {
            data,
            height: height as usize,
            width: width as usize,
            channels: self.color_space.channels(),
        })
    }

    /// ディレクトリ直下の対応画像をファイル名順に前処理する
    ///
    /// サブディレクトリ・対象外の拡張子・デコードできない画像はスキップする。
    pub fn preprocess_directory<P: AsRef<Path>>(&self, path: P) -> PreprocessResult<DirectoryImages<'_>> {
        let dir = path.as_ref();
        if !dir.is_dir() {
            return Err(PreprocessError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| PreprocessError::io(dir, e))? {
            let path = entry.map_err(|e| PreprocessError::io(dir, e))?.path();
            if !path.is_file() {
                continue;
            }
            if !has_supported_extension(&path, &self.extensions) {
                debug!("スキップ: {}", PreprocessError::UnsupportedFormat { path });
                continue;
            }
            entries.push(path);
        }
        entries.sort();

        Ok(DirectoryImages {
            preprocessor: self,
            entries: entries.into_iter(),
        })
    }

    /// クラスディレクトリから `step_budget` 個のバッチを作る
    ///
    /// 既定の走査設定（巡回・交互・前処理器と同じ拡張子）を使う。
    pub fn preprocess_classes<P: AsRef<Path>>(
        &self,
        step_budget: usize,
        root: P,
        encoding: &ClassEncoding,
        batch_size: usize,
    ) -> PreprocessResult<ClassBatches<'_>> {
        let scanner = DirectoryScanner::new(root, encoding.clone())
            .with_extensions(self.extensions.clone());
        self.preprocess_scan(step_budget, &scanner, batch_size)
    }

    /// 任意の走査設定で `step_budget` 個のバッチを作る
    pub fn preprocess_scan(
        &self,
        step_budget: usize,
        scanner: &DirectoryScanner,
        batch_size: usize,
    ) -> PreprocessResult<ClassBatches<'_>> {
        if batch_size == 0 {
            return Err(PreprocessError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        let scan = scanner.scan(step_budget.checked_mul(batch_size))?;

        Ok(ClassBatches {
            preprocessor: self,
            scan,
            label_len: scanner.encoding().label_len(),
            step_budget,
            batch_size,
            next_index: 1,
            done: false,
        })
    }
}

/// `preprocess_directory` のイテレータ: (ファイル名, 前処理済み画像)
#[derive(Debug)]
pub struct DirectoryImages<'a> {
    preprocessor: &'a ImagePreprocessor,
    entries: std::vec::IntoIter<PathBuf>,
}

impl Iterator for DirectoryImages<'_> {
    type Item = (String, PreprocessedImage);

    fn next(&mut self) -> Option<Self::Item> {
        for path in self.entries.by_ref() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.preprocessor.preprocess_image(&path) {
                Ok(image) => return Some((name, image)),
                Err(e) => warn!("画像をスキップします: {}", e),
            }
        }
        None
    }
}

/// `preprocess_classes` のイテレータ
///
/// 1..=step_budget のステップを返す。画像1枚でも失敗したらそのバッチは
/// エラーとして返し、以降は何も返さない（バッチを縮めることはしない）。
#[derive(Debug)]
pub struct ClassBatches<'a> {
    preprocessor: &'a ImagePreprocessor,
    scan: Scan,
    label_len: usize,
    step_budget: usize,
    batch_size: usize,
    next_index: usize,
    done: bool,
}

impl ClassBatches<'_> {
    fn fail(&mut self, error: PreprocessError) -> Option<PreprocessResult<TrainingStep>> {
        self.done = true;
        Some(Err(error))
    }
}

impl Iterator for ClassBatches<'_> {
    type Item = PreprocessResult<TrainingStep>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_index > self.step_budget {
            return None;
        }

        let mut builder = BatchBuilder::new(
            self.batch_size,
            self.preprocessor.image_shape(),
            self.label_len,
        );
        while !builder.is_full() {
            let sample = match self.scan.next() {
                Some(Ok(sample)) => sample,
                Some(Err(e)) => return self.fail(e),
                None => {
                    if !builder.is_empty() {
                        warn!(
                            "データが尽きたため不完全なバッチを破棄しました ({}/{})",
                            builder.len(),
                            self.batch_size
                        );
                    }
                    self.done = true;
                    return None;
                }
            };

            let image = match self.preprocessor.preprocess_image(&sample.path) {
                Ok(image) => image,
                Err(e) => return self.fail(e),
            };
            if let Err(e) = builder.push(image, &sample.label) {
                return self.fail(e);
            }
        }

        let step = TrainingStep {
            index: self.next_index,
            batch: builder.finish(),
        };
        self.next_index += 1;
        Some(Ok(step))
    }
}
