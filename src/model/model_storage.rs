//! チェックポイントの永続化
//!
//! Tar.gz形式でモデルの重みとメタデータを1ファイルにまとめて保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（役割マップ、エンコーディング、前処理設定など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;
use crate::model::tensor_roles::format_shape;

pub const METADATA_ENTRY: &str = "metadata.json";
pub const WEIGHTS_ENTRY: &str = "model.bin";

/// 拡張子が `.gz` でなければ `.tar.gz` を付ける
pub fn checkpoint_archive_path(path: &Path) -> PathBuf {
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        path.to_path_buf()
    } else {
        path.with_extension("tar.gz")
    }
}

pub fn checkpoint_exists(path: &Path) -> bool {
    checkpoint_archive_path(path).is_file()
}

/// メタデータと重みを保存し、書き込んだパスを返す
///
/// 一時ファイルに書いてから置き換えるので、途中で失敗しても既存の
/// チェックポイントは壊れない。
pub fn save_checkpoint(path: &Path, metadata: &ModelMetadata, weights: &[u8]) -> Result<PathBuf> {
    let archive_path = checkpoint_archive_path(path);
    if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let partial_path = archive_path.with_extension("partial");
    let written = write_archive(&partial_path, metadata, weights).and_then(|()| {
        std::fs::rename(&partial_path, &archive_path)
            .with_context(|| format!("Failed to move checkpoint into place: {:?}", archive_path))
    });
    if let Err(e) = written {
        if partial_path.exists() {
            std::fs::remove_file(&partial_path).ok();
        }
        return Err(e);
    }
    Ok(archive_path)
}

fn write_archive(path: &Path, metadata: &ModelMetadata, weights: &[u8]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create checkpoint file: {:?}", path))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    let json = metadata.to_json_string()?;
    append_entry(&mut builder, METADATA_ENTRY, json.as_bytes())?;
    append_entry(&mut builder, WEIGHTS_ENTRY, weights)?;

    builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;
    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// 指定したエントリだけを読み出す
fn read_entries(path: &Path, names: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
    let archive_path = checkpoint_archive_path(path);
    let file = File::open(&archive_path)
        .with_context(|| format!("Failed to open checkpoint: {:?}", archive_path))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut found = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().to_string();
        if names.contains(&name.as_str()) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found.insert(name, buffer);
            if found.len() == names.len() {
                break;
            }
        }
    }

    for name in names {
        if !found.contains_key(*name) {
            anyhow::bail!("{} not found in checkpoint {:?}", name, archive_path);
        }
    }
    Ok(found)
}

fn parse_metadata(bytes: &[u8]) -> Result<ModelMetadata> {
    let json = std::str::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(json)
}

/// チェックポイントからメタデータだけを読み込む
pub fn load_metadata(path: &Path) -> Result<ModelMetadata> {
    let entries = read_entries(path, &[METADATA_ENTRY])?;
    parse_metadata(&entries[METADATA_ENTRY])
}

/// メタデータと重みを共に読み込む
pub fn load_checkpoint(path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(path, &[METADATA_ENTRY, WEIGHTS_ENTRY])?;
    let metadata = parse_metadata(&entries[METADATA_ENTRY])?;
    let weights = entries.remove(WEIGHTS_ENTRY).unwrap_or_default();
    Ok((metadata, weights))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("フォーマット: v{} (役割マップ v{})", metadata.format_version, metadata.roles.version);
    println!("入力: {}", format_shape(&metadata.roles.input.shape));
    println!("ラベル: {}", format_shape(&metadata.roles.label.shape));
    println!("出力: {}", format_shape(&metadata.roles.output.shape));
    println!(
        "前処理: {}x{} {} ({:?})",
        metadata.image_width, metadata.image_height, metadata.color_space, metadata.resize_filter
    );
    for class in metadata.encoding.classes() {
        println!("クラス '{}': {:?} -> {}", class.name, class.label, class.display());
    }
    println!("バッチサイズ: {}", metadata.batch_size);
    println!("累計学習ステップ数: {}", metadata.steps_trained);
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClassEncoding, ColorSpace, ImagePreprocessor, TargetSize};
    use crate::model::tensor_roles::TensorRoles;
    use tempfile::TempDir;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(
            TensorRoles::new(32, 32, 3, 2),
            ClassEncoding::default(),
            &ImagePreprocessor::new(TargetSize::square(32), ColorSpace::Rgb),
            1,
            10,
        )
    }

    #[test]
    fn test_checkpoint_path_extension() {
        assert_eq!(
            checkpoint_archive_path(Path::new("saved/model")),
            PathBuf::from("saved/model.tar.gz")
        );
        assert_eq!(
            checkpoint_archive_path(Path::new("saved/model.tar.gz")),
            PathBuf::from("saved/model.tar.gz")
        );
    }

    #[test]
    fn test_save_and_load_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ckpt").join("model");
        let weights = vec![1u8, 2, 3, 4, 5];

        let saved = save_checkpoint(&path, &metadata(), &weights).unwrap();
        assert_eq!(saved, dir.path().join("ckpt").join("model.tar.gz"));
        assert!(checkpoint_exists(&path));
        assert!(!saved.with_extension("partial").exists());

        let (loaded, loaded_weights) = load_checkpoint(&saved).unwrap();
        assert_eq!(loaded_weights, weights);
        assert_eq!(loaded.steps_trained, 10);
        assert_eq!(load_metadata(&path).unwrap().roles, loaded.roles);
    }

    #[test]
    fn test_missing_entry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.tar.gz");
        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        append_entry(&mut builder, METADATA_ENTRY, metadata().to_json_string().unwrap().as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(load_metadata(&path).is_ok());
        let err = load_checkpoint(&path).unwrap_err();
        assert!(err.to_string().contains(WEIGHTS_ENTRY));
    }

    #[test]
    fn test_failed_save_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        // 置き換え先がディレクトリなので rename が失敗する
        let target = dir.path().join("model.tar.gz");
        std::fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(save_checkpoint(&target, &metadata(), &[1, 2, 3]).is_err());
        assert!(!target.with_extension("partial").exists());
        assert!(target.join("occupied").is_dir());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_metadata(&dir.path().join("nothing.tar.gz")).is_err());
        assert!(!checkpoint_exists(&dir.path().join("nothing")));
    }
}
