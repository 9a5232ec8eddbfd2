//! ラベル付きディレクトリの走査
//!
//! ```text
//! root/
//!   cats/
//!     cat.0001.jpg
//!   dogs/
//!     dog.0001.jpg
//! ```
//!
//! エンコーディングで宣言されたクラスディレクトリのみを非再帰で走査し、
//! (画像パス, ラベル) の組を遅延的に返します。
//! クラスごとのカーソルは1件返すごとにちょうど1つ進み、
//! 巡回ポリシーではクラス末尾で先頭に戻ります。

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::encoding::{ClassEncoding, ClassEntry};
use crate::data::{default_extensions, has_supported_extension};
use crate::error::{PreprocessError, PreprocessResult};

/// 走査し終えたときの振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPolicy {
    /// 全クラスを無限に巡回する（ステップ数で打ち切る）
    #[default]
    Cycle,
    /// 各クラスを1周したら終了
    Exhaust,
}

/// クラス間の並び順
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanOrder {
    /// 1クラス1件ずつ交互に返す
    #[default]
    Interleave,
    /// クラスを1つ読み切ってから次のクラスへ
    Concatenate,
}

/// 走査結果の1件
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPath {
    pub path: PathBuf,
    pub class_name: String,
    pub label: Vec<f32>,
}

/// ラベル付きディレクトリツリーの走査設定
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    root: PathBuf,
    encoding: ClassEncoding,
    extensions: Vec<String>,
    policy: ScanPolicy,
    order: ScanOrder,
    shuffle_seed: Option<u64>,
}

impl DirectoryScanner {
    pub fn new<P: AsRef<Path>>(root: P, encoding: ClassEncoding) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            encoding,
            extensions: default_extensions(),
            policy: ScanPolicy::default(),
            order: ScanOrder::default(),
            shuffle_seed: None,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_policy(mut self, policy: ScanPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_order(mut self, order: ScanOrder) -> Self {
        self.order = order;
        self
    }

    /// 指定するとクラスを読み直すたびに再現可能な順序でシャッフルする
    pub fn with_shuffle_seed(mut self, seed: Option<u64>) -> Self {
        self.shuffle_seed = seed;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn encoding(&self) -> &ClassEncoding {
        &self.encoding
    }

    pub fn policy(&self) -> ScanPolicy {
        self.policy
    }

    /// 走査を開始する
    ///
    /// ルートと宣言済みの全クラスディレクトリの存在をここで検証する。
    /// 返るイテレータは独立しており、呼び出すたびに先頭からやり直せる。
    pub fn scan(&self, step_budget: Option<usize>) -> PreprocessResult<Scan> {
        if !self.root.is_dir() {
            return Err(PreprocessError::DirectoryNotFound {
                path: self.root.clone(),
            });
        }

        let mut classes = Vec::with_capacity(self.encoding.len());
        for (index, entry) in self.encoding.classes().iter().enumerate() {
            let dir = self.root.join(&entry.name);
            if !dir.is_dir() {
                return Err(PreprocessError::DirectoryNotFound { path: dir });
            }
            classes.push(ClassCursor::new(index, entry, dir));
        }

        Ok(Scan {
            classes,
            extensions: self.extensions.clone(),
            policy: self.policy,
            order: self.order,
            shuffle_seed: self.shuffle_seed,
            budget: step_budget,
            produced: 0,
            current: 0,
            finished: false,
        })
    }
}

/// クラス1つ分の読み出し位置
#[derive(Debug)]
struct ClassCursor {
    index: usize,
    name: String,
    label: Vec<f32>,
    dir: PathBuf,
    entries: Vec<PathBuf>,
    position: usize,
    listed: bool,
    passes: u64,
}

impl ClassCursor {
    fn new(index: usize, entry: &ClassEntry, dir: PathBuf) -> Self {
        Self {
            index,
            name: entry.name.clone(),
            label: entry.label.clone(),
            dir,
            entries: Vec::new(),
            position: 0,
            listed: false,
            passes: 0,
        }
    }

    /// ディレクトリを読み直して位置を先頭に戻す
    fn list(&mut self, extensions: &[String], shuffle_seed: Option<u64>) -> PreprocessResult<()> {
        let read_dir = std::fs::read_dir(&self.dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PreprocessError::DirectoryNotFound {
                path: self.dir.clone(),
            },
            _ => PreprocessError::io(&self.dir, e),
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry.map_err(|e| PreprocessError::io(&self.dir, e))?.path();
            if !path.is_file() {
                continue;
            }
            if !has_supported_extension(&path, extensions) {
                debug!("スキップ: {}", PreprocessError::UnsupportedFormat { path });
                continue;
            }
            entries.push(path);
        }
        entries.sort();

        if let Some(seed) = shuffle_seed {
            let pass_seed = seed
                .wrapping_add(self.passes.wrapping_mul(1_000_003))
                .wrapping_add(self.index as u64);
            let mut rng = rand::rngs::StdRng::seed_from_u64(pass_seed);
            entries.shuffle(&mut rng);
        }

        if entries.is_empty() {
            warn!("クラス '{}' に画像がありません: {}", self.name, self.dir.display());
        }

        self.entries = entries;
        self.position = 0;
        self.listed = true;
        self.passes += 1;
        Ok(())
    }

    /// 次のパスを取り出す。`wrap` なら末尾で読み直して先頭に戻る
    fn take(
        &mut self,
        wrap: bool,
        extensions: &[String],
        shuffle_seed: Option<u64>,
    ) -> PreprocessResult<Option<PathBuf>> {
        if !self.listed {
            self.list(extensions, shuffle_seed)?;
        }
        if self.position >= self.entries.len() {
            if !wrap || self.entries.is_empty() {
                return Ok(None);
            }
            self.list(extensions, shuffle_seed)?;
            if self.entries.is_empty() {
                return Ok(None);
            }
        }

        let path = self.entries[self.position].clone();
        self.position += 1;
        Ok(Some(path))
    }

    /// 次回アクセス時に読み直させる
    fn rewind(&mut self) {
        self.listed = false;
        self.position = 0;
    }
}

/// 遅延評価される走査イテレータ
#[derive(Debug)]
pub struct Scan {
    classes: Vec<ClassCursor>,
    extensions: Vec<String>,
    policy: ScanPolicy,
    order: ScanOrder,
    shuffle_seed: Option<u64>,
    budget: Option<usize>,
    produced: usize,
    current: usize,
    finished: bool,
}

impl Scan {
    /// これまでに返した件数
    pub fn produced(&self) -> usize {
        self.produced
    }

    fn next_interleaved(&mut self) -> PreprocessResult<Option<(usize, PathBuf)>> {
        let wrap = self.policy == ScanPolicy::Cycle;
        for _ in 0..self.classes.len() {
            let index = self.current;
            self.current = (self.current + 1) % self.classes.len();
            if let Some(path) = self.classes[index].take(wrap, &self.extensions, self.shuffle_seed)? {
                return Ok(Some((index, path)));
            }
        }
        Ok(None)
    }

    fn next_concatenated(&mut self) -> PreprocessResult<Option<(usize, PathBuf)>> {
        // 現在のクラスが空でも、全クラスを1周すれば判定できる
        for _ in 0..=self.classes.len() {
            let index = self.current;
            if let Some(path) = self.classes[index].take(false, &self.extensions, self.shuffle_seed)? {
                return Ok(Some((index, path)));
            }
            if self.policy == ScanPolicy::Cycle {
                self.classes[index].rewind();
            }
            self.current = (self.current + 1) % self.classes.len();
        }
        Ok(None)
    }
}

impl Iterator for Scan {
    type Item = PreprocessResult<LabeledPath>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.classes.is_empty() {
            return None;
        }
        if let Some(budget) = self.budget {
            if self.produced >= budget {
                return None;
            }
        }

        let next = match self.order {
            ScanOrder::Interleave => self.next_interleaved(),
            ScanOrder::Concatenate => self.next_concatenated(),
        };

        match next {
            Ok(Some((index, path))) => {
                self.produced += 1;
                let class = &self.classes[index];
                Some(Ok(LabeledPath {
                    path,
                    class_name: class.name.clone(),
                    label: class.label.clone(),
                }))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
