//! モデル学習
//!
//! クラスディレクトリから前処理済みバッチを作り、Nesterov モーメンタム付き SGD で
//! 指定ステップ数だけ学習してチェックポイントを保存します。

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig},
    tensor::backend::AutodiffBackend,
};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::data::argmax;
use crate::metrics::StepCounter;
use crate::ml::ml_model::{
    batch_images, batch_labels, load_weights, record_weights, root_mean_squared_error,
    tensor_values, CatDogClassifier, ModelConfig,
};
use crate::model::{load_checkpoint, save_checkpoint, AppConfig, ModelMetadata, TensorRoles};
use crate::summary::SummaryWriter;

/// 学習の実行オプション
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// 学習するステップ（バッチ）数
    pub steps: usize,
    /// 既存のチェックポイントから再開する
    pub resuming: bool,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// 今回の実行で学習したステップ数
    pub steps: usize,
    /// 再開分を含む累計ステップ数
    pub total_steps: u64,
    pub final_objective: Option<f32>,
    /// 最後に報告された移動平均正解率（%）
    pub final_accuracy: Option<f32>,
    pub checkpoint: PathBuf,
}

/// 学習を実行
pub fn train_model<B: AutodiffBackend>(
    config: &AppConfig,
    options: &TrainOptions,
    device: &B::Device,
) -> Result<TrainingReport> {
    config.validate()?;
    if options.steps == 0 {
        anyhow::bail!("Number of steps must be at least 1");
    }

    let preprocessor = config.preprocessor();
    let scanner = config.scanner();
    let encoding = &config.encoding;
    let batch_size = config.preprocessing.batch_size;

    let [height, width, channels] = preprocessor.image_shape();
    let label_len = encoding.label_len();
    let roles = TensorRoles::new(height, width, channels, label_len);

    let model_config = ModelConfig::new(label_len).with_channels(channels);
    model_config.check_input(height, width)?;

    let checkpoint_path = &config.paths.checkpoint_path;
    let (mut model, previous_steps) = if options.resuming {
        let (metadata, weights) = load_checkpoint(checkpoint_path)
            .with_context(|| format!("Failed to resume from {:?}", checkpoint_path))?;
        metadata.roles.ensure_compatible(&roles)?;
        if &metadata.encoding != encoding {
            anyhow::bail!("Checkpoint class encoding does not match the configured encoding");
        }
        info!(
            "チェックポイントから再開します: {} (学習済み {} ステップ)",
            checkpoint_path.display(),
            metadata.steps_trained
        );
        let model = load_weights(model_config.init::<B>(device), weights, device)?;
        (model, metadata.steps_trained)
    } else {
        info!("新しいモデルで学習を開始します");
        (model_config.init::<B>(device), 0)
    };

    let training = &config.training;
    let momentum = MomentumConfig::new()
        .with_momentum(training.momentum)
        .with_dampening(0.0)
        .with_nesterov(training.nesterov);
    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(momentum))
        .init::<B, CatDogClassifier<B>>();

    let mut summary = SummaryWriter::create(&config.paths.summary_dir)?;
    let mut counter = StepCounter::new(Some(options.steps));
    let mut final_objective = None;

    info!(
        "学習開始: {} ステップ, バッチサイズ: {}, 学習率: {}",
        options.steps, batch_size, training.learning_rate
    );

    for step in preprocessor.preprocess_scan(options.steps, &scanner, batch_size)? {
        let step = step?;
        let batch = &step.batch;

        let output = model.forward(batch_images::<B>(batch, device));
        let objective = root_mean_squared_error(output.clone(), batch_labels::<B>(batch, device));

        let outputs = tensor_values(output.inner())?;
        let objective_value = tensor_values(objective.clone().inner())?
            .first()
            .copied()
            .unwrap_or(f32::NAN);

        let grads = GradientsParams::from_grads(objective.backward(), &model);
        model = optimizer.step(training.learning_rate, model, grads);

        let accuracy = accuracy_percent(&outputs, batch.labels(), label_len);
        counter.advance();
        counter.record_accuracy(accuracy);
        info!("{}", counter.report(objective_value));
        summary.add_scalars(step.index, objective_value, accuracy)?;
        final_objective = Some(objective_value);
    }

    if counter.step() == 0 {
        anyhow::bail!(
            "No complete batch could be built from {:?}; checkpoint was not written",
            config.paths.train_dir
        );
    }
    if counter.step() < options.steps {
        warn!(
            "学習データが尽きたため {}/{} ステップで終了しました",
            counter.step(),
            options.steps
        );
    }

    let total_steps = previous_steps + counter.step() as u64;
    let weights = record_weights(&model.valid())?;
    let metadata = ModelMetadata::new(roles, encoding.clone(), &preprocessor, batch_size, total_steps);
    let checkpoint = save_checkpoint(checkpoint_path, &metadata, &weights)?;
    info!(
        "チェックポイントを保存しました: {} (累計 {} ステップ)",
        checkpoint.display(),
        total_steps
    );

    Ok(TrainingReport {
        steps: counter.step(),
        total_steps,
        final_objective,
        final_accuracy: counter.moving_average(),
        checkpoint,
    })
}

/// 出力とラベルの argmax が一致した割合（%）
pub fn accuracy_percent(outputs: &[f32], labels: &[f32], label_len: usize) -> f32 {
    if label_len == 0 {
        return 0.0;
    }
    let mut total = 0usize;
    let mut correct = 0usize;
    for (output, label) in outputs.chunks(label_len).zip(labels.chunks(label_len)) {
        total += 1;
        if argmax(output).is_some() && argmax(output) == argmax(label) {
            correct += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    correct as f32 * 100.0 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColorSpace;
    use crate::model::{checkpoint_exists, load_metadata, DeviceType};
    use crate::summary::SCALARS_FILE;
    use burn::backend::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(40, 36, Rgb(color)).save(path).unwrap();
    }

    fn fixture(dir: &Path) -> AppConfig {
        let train = dir.join("train");
        std::fs::create_dir_all(train.join("cats")).unwrap();
        std::fs::create_dir_all(train.join("dogs")).unwrap();
        write_image(&train.join("cats").join("c1.png"), [200, 40, 40]);
        write_image(&train.join("cats").join("c2.png"), [180, 60, 30]);
        write_image(&train.join("dogs").join("d1.png"), [30, 40, 200]);

        let mut config = AppConfig::default();
        config.device_type = DeviceType::Cpu;
        config.paths.train_dir = train;
        config.paths.checkpoint_path = dir.join("saved").join("model.tar.gz");
        config.paths.summary_dir = dir.join("summaries");
        config.preprocessing.width = 32;
        config.preprocessing.height = 32;
        config.preprocessing.color_space = ColorSpace::Rgb;
        config.preprocessing.batch_size = 2;
        config
    }

    #[test]
    fn test_accuracy_percent() {
        let labels = [1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let outputs = [0.9, 0.1, 0.2, 0.8, 0.3, 0.7, 0.6, 0.4];
        assert_eq!(accuracy_percent(&outputs, &labels, 2), 50.0);
        assert_eq!(accuracy_percent(&[], &[], 2), 0.0);
    }

    #[test]
    fn test_train_and_resume() {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path());
        let device = NdArrayDevice::default();

        let options = TrainOptions {
            steps: 2,
            resuming: false,
        };
        let report = train_model::<TestBackend>(&config, &options, &device).unwrap();
        assert_eq!(report.steps, 2);
        assert_eq!(report.total_steps, 2);
        assert!(report.final_objective.map(|v| v.is_finite()).unwrap_or(false));
        assert!(report.final_accuracy.is_none());
        assert!(checkpoint_exists(&config.paths.checkpoint_path));

        let scalars = std::fs::read_to_string(config.paths.summary_dir.join(SCALARS_FILE)).unwrap();
        assert_eq!(scalars.lines().count(), 3);

        let options = TrainOptions {
            steps: 1,
            resuming: true,
        };
        let report = train_model::<TestBackend>(&config, &options, &device).unwrap();
        assert_eq!(report.total_steps, 3);
        let metadata = load_metadata(&config.paths.checkpoint_path).unwrap();
        assert_eq!(metadata.steps_trained, 3);
        assert_eq!(metadata.roles.image_shape(), Some([32, 32, 3]));
    }

    #[test]
    fn test_resume_rejects_incompatible_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut config = fixture(dir.path());
        let device = NdArrayDevice::default();

        let options = TrainOptions {
            steps: 1,
            resuming: false,
        };
        train_model::<TestBackend>(&config, &options, &device).unwrap();

        config.preprocessing.color_space = ColorSpace::Grayscale;
        let options = TrainOptions {
            steps: 1,
            resuming: true,
        };
        let err = train_model::<TestBackend>(&config, &options, &device).unwrap_err();
        assert!(format!("{:#}", err).contains("input"));
    }

    #[test]
    fn test_resume_without_checkpoint_fails() {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path());
        let options = TrainOptions {
            steps: 1,
            resuming: true,
        };
        assert!(train_model::<TestBackend>(&config, &options, &NdArrayDevice::default()).is_err());
    }

    #[test]
    fn test_empty_dataset_fails_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut config = fixture(dir.path());
        for class in ["cats", "dogs"] {
            let class_dir = config.paths.train_dir.join(class);
            std::fs::remove_dir_all(&class_dir).unwrap();
            std::fs::create_dir_all(&class_dir).unwrap();
        }

        let options = TrainOptions {
            steps: 5,
            resuming: false,
        };
        let device = NdArrayDevice::default();
        assert!(train_model::<TestBackend>(&config, &options, &device).is_err());
        assert!(!checkpoint_exists(&config.paths.checkpoint_path));

        // 1周で1バッチに満たない場合も同様
        write_image(&config.paths.train_dir.join("cats").join("c1.png"), [200, 40, 40]);
        config.preprocessing.scan_policy = crate::data::ScanPolicy::Exhaust;
        assert!(train_model::<TestBackend>(&config, &options, &device).is_err());
        assert!(!checkpoint_exists(&config.paths.checkpoint_path));
    }

    #[test]
    fn test_image_error_stops_training() {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path());
        std::fs::write(config.paths.train_dir.join("cats").join("c0.png"), b"not a png").unwrap();

        let options = TrainOptions {
            steps: 2,
            resuming: false,
        };
        assert!(train_model::<TestBackend>(&config, &options, &NdArrayDevice::default()).is_err());
        assert!(!checkpoint_exists(&config.paths.checkpoint_path));
    }
}
