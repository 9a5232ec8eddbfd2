//! 学習中のスカラー値の記録
//!
//! 学習開始時にサマリーディレクトリを作り直し、
//! `scalars.csv` に1ステップ1行ずつ追記します。

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const SCALARS_FILE: &str = "scalars.csv";

#[derive(Debug, Serialize)]
struct ScalarRow {
    step: usize,
    objective: f32,
    accuracy: f32,
}

/// ステップごとの目的関数値と正解率を書き出す
pub struct SummaryWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl SummaryWriter {
    /// 既存のサマリーを削除して新しく作成する
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to clear summary directory: {:?}", dir))?;
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create summary directory: {:?}", dir))?;

        let path = dir.join(SCALARS_FILE);
        let writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create summary file: {:?}", path))?;
        Ok(Self { writer, path })
    }

    pub fn add_scalars(&mut self, step: usize, objective: f32, accuracy: f32) -> Result<()> {
        self.writer
            .serialize(ScalarRow {
                step,
                objective,
                accuracy,
            })
            .context("Failed to write summary row")?;
        self.writer.flush().context("Failed to flush summary file")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
