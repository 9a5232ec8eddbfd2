//! 機械学習モデルの共通定義
//!
//! 犬猫分類用のCNNモデルと、前処理済みデータをテンソルに変換する補助関数を提供します。

use anyhow::{anyhow, Result};
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::{MseLoss, Reduction},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d,
    },
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::data::{Batch, PreprocessedImage};

/// 畳み込みブロックごとのフィルタ数
pub const BLOCK_FILTERS: [usize; 5] = [32, 64, 128, 256, 512];

/// 入力の最小辺長（2x2プーリング5回で1ピクセルになる大きさ）
pub const MIN_INPUT_SIZE: usize = 1 << BLOCK_FILTERS.len();

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 出力ベクトルの長さ（ラベル長）
    pub num_classes: usize,
    /// 入力チャネル数
    #[config(default = 3)]
    pub channels: usize,
}

impl ModelConfig {
    /// 入力サイズがプーリング回数に足りるか検証する
    pub fn check_input(&self, height: usize, width: usize) -> Result<()> {
        if height < MIN_INPUT_SIZE || width < MIN_INPUT_SIZE {
            anyhow::bail!(
                "Input {}x{} is too small for the model (minimum {}x{})",
                width,
                height,
                MIN_INPUT_SIZE,
                MIN_INPUT_SIZE
            );
        }
        if self.num_classes == 0 || self.channels == 0 {
            anyhow::bail!(
                "Model needs at least one class and one channel (classes: {}, channels: {})",
                self.num_classes,
                self.channels
            );
        }
        Ok(())
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> CatDogClassifier<B> {
        let mut blocks = Vec::with_capacity(BLOCK_FILTERS.len());
        let mut in_channels = self.channels;
        for &filters in BLOCK_FILTERS.iter() {
            blocks.push(ConvBlock {
                conv: Conv2dConfig::new([in_channels, filters], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
                pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            });
            in_channels = filters;
        }

        CatDogClassifier {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(in_channels, self.num_classes).init(device),
        }
    }
}

/// Conv 3x3 (same) + ELU + MaxPool 2x2
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        self.pool.forward(elu(x))
    }
}

/// 犬猫分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (same padding) + ELU + MaxPool 2x2} x 5層 (32, 64, 128, 256, 512)
/// - Global Average Pooling
/// - FC: 512 -> num_classes
#[derive(Module, Debug)]
pub struct CatDogClassifier<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
    head: Linear<B>,
}

impl<B: Backend> CatDogClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, channels, height, width]
    ///
    /// # 戻り値
    /// - ラベルと同じ長さの出力 [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.global_pool.forward(x);
        let [_, channels, _, _] = x.dims();
        self.head.forward(x.reshape([batch_size, channels]))
    }
}

/// ELU (alpha = 1)
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let positive = x.clone().clamp_min(0.0);
    let negative = x.clamp_max(0.0).exp().sub_scalar(1.0);
    positive + negative
}

/// 出力とラベルの二乗平均平方根誤差
pub fn root_mean_squared_error<B: Backend>(output: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    MseLoss::new().forward(output, labels, Reduction::Mean).sqrt()
}

/// バッチの画像を [N, C, H, W] のテンソルに変換
pub fn batch_images<B: Backend>(batch: &Batch, device: &B::Device) -> Tensor<B, 4> {
    let [n, h, w, c] = batch.images_shape();
    Tensor::<B, 1>::from_floats(batch.images_nchw().as_slice(), device).reshape([n, c, h, w])
}

/// バッチのラベルを [N, L] のテンソルに変換
pub fn batch_labels<B: Backend>(batch: &Batch, device: &B::Device) -> Tensor<B, 2> {
    Tensor::<B, 1>::from_floats(batch.labels(), device).reshape(batch.labels_shape())
}

/// 画像1枚を [1, C, H, W] のテンソルに変換
pub fn image_tensor<B: Backend>(image: &PreprocessedImage, device: &B::Device) -> Tensor<B, 4> {
    let [h, w, c] = image.shape();
    Tensor::<B, 1>::from_floats(image.to_chw().as_slice(), device).reshape([1, c, h, w])
}

/// テンソルの値をCPU側に読み出す
pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Failed to read tensor data: {:?}", e))
}

/// モデルの重みをバイト列に変換（f32精度）
pub fn record_weights<B: Backend>(model: &CatDogClassifier<B>) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|e| anyhow!("Failed to record model weights: {:?}", e))
}

/// バイト列から重みを復元する
pub fn load_weights<B: Backend>(
    model: CatDogClassifier<B>,
    weights: Vec<u8>,
    device: &B::Device,
) -> Result<CatDogClassifier<B>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = Recorder::<B>::load(&recorder, weights, device)
        .map_err(|e| anyhow!("Failed to load model weights: {:?}", e))?;
    Ok(model.load_record(record))
}
