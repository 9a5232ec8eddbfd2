//! 犬猫分類 CLI
//!
//! `--train --steps N [--resuming]` で学習、`--classify --source PATH` で分類します。

#![recursion_limit = "256"]
use anyhow::Result;
use burn::backend::{Autodiff, Wgpu};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cats_vs_dogs::ml::{train_model, Classification, InferenceEngine, TrainOptions, TrainingReport};
use cats_vs_dogs::model::{checkpoint_exists, AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(name = "cats_vs_dogs", version, about = "Cats vs. dogs image classifier")]
struct Cli {
    /// 学習を実行する
    #[arg(long, requires = "steps", conflicts_with = "classify")]
    train: bool,

    /// 保存済みチェックポイントから学習を再開する
    #[arg(long, requires = "train")]
    resuming: bool,

    /// 学習ステップ（バッチ）数
    #[arg(long)]
    steps: Option<usize>,

    /// 画像を分類する
    #[arg(long, requires = "source")]
    classify: bool,

    /// 分類対象のファイルまたはディレクトリ
    #[arg(long)]
    source: Option<String>,

    /// 設定ファイル
    #[arg(long, default_value_os_t = AppConfig::default_path())]
    config: PathBuf,

    /// 学習前の上書き確認（チェックポイントとサマリー）を省略する
    #[arg(short = 'y', long)]
    yes: bool,

    /// 現在の設定を設定ファイルに書き出して終了する
    #[arg(long)]
    write_config: bool,

    /// 詳細ログを出力する
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load_if_exists(&cli.config)?;

    if cli.write_config {
        config.save(&cli.config)?;
        info!("設定を書き出しました: {}", cli.config.display());
        return Ok(());
    }

    if cli.train {
        let steps = cli
            .steps
            .ok_or_else(|| anyhow::anyhow!("--train requires --steps"))?;
        config.display();

        if !cli.yes {
            confirm_overwrite(&config, cli.resuming)?;
        }

        let options = TrainOptions {
            steps,
            resuming: cli.resuming,
        };
        let report = run_training(&config, &options)?;
        info!(
            "学習完了: {} ステップ (累計 {}) -> {}",
            report.steps,
            report.total_steps,
            report.checkpoint.display()
        );
    } else if cli.classify {
        let source = cli
            .source
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--classify requires --source"))?;
        let result = run_classification(&config, source)?;
        match result {
            Classification::Single(label) => println!("{}", label),
            directory => print!("{}", directory),
        }
    } else {
        anyhow::bail!("Nothing to do: pass --train --steps N or --classify --source PATH");
    }

    Ok(())
}

/// 学習前の確認メッセージ
///
/// 再開時もチェックポイントは上書きされ、サマリーは削除される。
fn overwrite_prompt(config: &AppConfig, resuming: bool) -> String {
    let checkpoint = config.paths.checkpoint_path.display();
    let summary = config.paths.summary_dir.display();
    if resuming {
        format!(
            "{} から再開し、同じファイルに上書き保存します。{} は削除されます。続行しますか？ [y/N]: ",
            checkpoint, summary
        )
    } else if checkpoint_exists(&config.paths.checkpoint_path) {
        format!(
            "既存の {} を新しいモデルで上書きし、{} を削除します。続行しますか？ [y/N]: ",
            checkpoint, summary
        )
    } else {
        format!(
            "新しいモデルを {} に保存し、{} を削除します。続行しますか？ [y/N]: ",
            checkpoint, summary
        )
    }
}

/// 学習でチェックポイントとサマリーを上書きしてよいか確認する
fn confirm_overwrite(config: &AppConfig, resuming: bool) -> Result<()> {
    print!("{}", overwrite_prompt(config, resuming));
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    if matches!(answer.trim(), "y" | "Y" | "yes") {
        Ok(())
    } else {
        anyhow::bail!("Program closed.")
    }
}

fn run_training(config: &AppConfig, options: &TrainOptions) -> Result<TrainingReport> {
    info!("計算デバイス: {}", config.device_type);
    match config.device_type {
        DeviceType::Wgpu => {
            train_model::<Autodiff<Wgpu>>(config, options, &WgpuDevice::default())
        }
        DeviceType::Cpu => {
            train_model::<Autodiff<NdArray>>(config, options, &NdArrayDevice::default())
        }
    }
}

fn run_classification(config: &AppConfig, source: &str) -> Result<Classification> {
    let checkpoint = &config.paths.checkpoint_path;
    match config.device_type {
        DeviceType::Wgpu => {
            InferenceEngine::<Wgpu>::load(checkpoint, &WgpuDevice::default())?.classify_source(source)
        }
        DeviceType::Cpu => {
            InferenceEngine::<NdArray>::load(checkpoint, &NdArrayDevice::default())?
                .classify_source(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flag_requirements() {
        assert!(Cli::try_parse_from(["cats_vs_dogs", "--train"]).is_err());
        assert!(Cli::try_parse_from(["cats_vs_dogs", "--classify"]).is_err());
        assert!(Cli::try_parse_from(["cats_vs_dogs", "--resuming", "--steps", "3"]).is_err());

        let cli = Cli::try_parse_from(["cats_vs_dogs", "--train", "--resuming", "--steps", "5"]).unwrap();
        assert!(cli.train && cli.resuming);
        assert_eq!(cli.steps, Some(5));
        assert_eq!(cli.config, PathBuf::from("config.json"));

        let cli = Cli::try_parse_from(["cats_vs_dogs", "--classify", "--source", "pics"]).unwrap();
        assert_eq!(cli.source.as_deref(), Some("pics"));
    }

    #[test]
    fn test_overwrite_prompt_covers_resumed_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.paths.checkpoint_path = dir.path().join("model.tar.gz");
        config.paths.summary_dir = dir.path().join("summaries");

        let resumed = overwrite_prompt(&config, true);
        assert!(resumed.contains("model.tar.gz"));
        assert!(resumed.contains("summaries"));
        assert!(overwrite_prompt(&config, false).starts_with("新しいモデル"));

        std::fs::write(&config.paths.checkpoint_path, b"x").unwrap();
        assert!(overwrite_prompt(&config, false).starts_with("既存の"));
    }
}
