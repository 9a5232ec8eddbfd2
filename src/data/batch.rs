//! バッチの組み立て

use crate::data::preprocessor::PreprocessedImage;
use crate::error::{PreprocessError, PreprocessResult};

/// 画像とラベルを積み重ねたバッチ
///
/// - images: [N, H, W, C] の順で平坦化
/// - labels: [N, L] の順で平坦化
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    images: Vec<f32>,
    labels: Vec<f32>,
    len: usize,
    image_shape: [usize; 3],
    label_len: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn images(&self) -> &[f32] {
        &self.images
    }

    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// [N, H, W, C]
    pub fn images_shape(&self) -> [usize; 4] {
        let [h, w, c] = self.image_shape;
        [self.len, h, w, c]
    }

    /// [N, L]
    pub fn labels_shape(&self) -> [usize; 2] {
        [self.len, self.label_len]
    }

    /// 範囲外なら None
    pub fn image(&self, index: usize) -> Option<&[f32]> {
        if index >= self.len {
            return None;
        }
        let size = self.image_shape.iter().product::<usize>();
        self.images.get(index * size..(index + 1) * size)
    }

    pub fn label(&self, index: usize) -> Option<&[f32]> {
        if index >= self.len {
            return None;
        }
        self.labels
            .get(index * self.label_len..(index + 1) * self.label_len)
    }

    /// [N, C, H, W] に並べ替えた画像データ
    pub fn images_nchw(&self) -> Vec<f32> {
        let [h, w, c] = self.image_shape;
        let size = h * w * c;
        let mut out = Vec::with_capacity(self.images.len());
        if size == 0 {
            return out;
        }
        for image in self.images.chunks(size) {
            out.extend(chw_from_hwc(image, h, w, c));
        }
        out
    }

    pub fn into_parts(self) -> (Vec<f32>, Vec<f32>) {
        (self.images, self.labels)
    }
}

pub(crate) fn chw_from_hwc(hwc: &[f32], h: usize, w: usize, c: usize) -> Vec<f32> {
    let npix = h * w;
    let mut chw = vec![0.0f32; hwc.len()];
    for i in 0..npix {
        for ch in 0..c {
            chw[ch * npix + i] = hwc[i * c + ch];
        }
    }
    chw
}

/// 固定サイズのバッチを組み立てる
#[derive(Debug)]
pub struct BatchBuilder {
    capacity: usize,
    image_shape: [usize; 3],
    label_len: usize,
    images: Vec<f32>,
    labels: Vec<f32>,
    len: usize,
}

impl BatchBuilder {
    pub fn new(capacity: usize, image_shape: [usize; 3], label_len: usize) -> Self {
        let image_size = image_shape.iter().product::<usize>();
        Self {
            capacity,
            image_shape,
            label_len,
            images: Vec::with_capacity(capacity * image_size),
            labels: Vec::with_capacity(capacity * label_len),
            len: 0,
        }
    }

    /// 画像とラベルを1件追加する（形状が揃わなければエラー）
    pub fn push(&mut self, image: PreprocessedImage, label: &[f32]) -> PreprocessResult<()> {
        if self.is_full() {
            return Err(PreprocessError::InvalidConfig(format!(
                "batch is already full ({} items)",
                self.capacity
            )));
        }
        if image.shape() != self.image_shape {
            return Err(PreprocessError::InvalidConfig(format!(
                "image shape {:?} does not match batch shape {:?}",
                image.shape(),
                self.image_shape
            )));
        }
        if label.len() != self.label_len {
            return Err(PreprocessError::InvalidConfig(format!(
                "label length {} does not match {}",
                label.len(),
                self.label_len
            )));
        }

        self.images.extend(image.into_vec());
        self.labels.extend_from_slice(label);
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn finish(self) -> Batch {
        Batch {
            images: self.images,
            labels: self.labels,
            len: self.len,
            image_shape: self.image_shape,
            label_len: self.label_len,
        }
    }
}

/// 学習ループに渡す1ステップ分のデータ
#[derive(Debug, Clone)]
pub struct TrainingStep {
    /// 1始まりのステップ番号
    pub index: usize,
    pub batch: Batch,
}
