//! チェックポイントのメタデータを表示するツール

use cats_vs_dogs::model::{checkpoint_archive_path, load_metadata, print_metadata_info, AppConfig};
use std::path::PathBuf;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let model_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        AppConfig::load_or_default(AppConfig::default_path()).paths.checkpoint_path
    };

    println!("チェックポイント: {}", checkpoint_archive_path(&model_path).display());
    match load_metadata(&model_path) {
        Ok(metadata) => print_metadata_info(&metadata),
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            std::process::exit(1);
        }
    }
}
