//! テンソルの役割マップ
//!
//! 入力・ラベル・出力の各テンソルの形状をモデル生成時に一度だけ決め、
//! チェックポイントと一緒に保存します。再開・推論時はこのマップを検証して
//! 名前検索に頼らずにモデルを組み立てます。
//!
//! 形状は外部向けの [N, H, W, C] 表記で、`None` はバッチ次元（可変）を表します。

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// 役割マップのフォーマットバージョン
pub const ROLE_MAP_VERSION: u32 = 1;

/// テンソルの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Label,
    Output,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Input => "input",
            Role::Label => "label",
            Role::Output => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<Option<usize>>,
}

impl TensorSpec {
    fn new(role: Role, shape: Vec<Option<usize>>) -> Self {
        Self {
            name: role.as_str().to_string(),
            shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorRoles {
    pub version: u32,
    pub input: TensorSpec,
    pub label: TensorSpec,
    pub output: TensorSpec,
}

impl TensorRoles {
    pub fn new(height: usize, width: usize, channels: usize, label_len: usize) -> Self {
        Self {
            version: ROLE_MAP_VERSION,
            input: TensorSpec::new(
                Role::Input,
                vec![None, Some(height), Some(width), Some(channels)],
            ),
            label: TensorSpec::new(Role::Label, vec![None, Some(label_len)]),
            output: TensorSpec::new(Role::Output, vec![None, Some(label_len)]),
        }
    }

    pub fn get(&self, role: Role) -> &TensorSpec {
        match role {
            Role::Input => &self.input,
            Role::Label => &self.label,
            Role::Output => &self.output,
        }
    }

    /// 入力1枚分の形状 [H, W, C]
    pub fn image_shape(&self) -> Option<[usize; 3]> {
        match self.input.shape.as_slice() {
            [_, Some(h), Some(w), Some(c)] => Some([*h, *w, *c]),
            _ => None,
        }
    }

    /// 出力ベクトルの長さ
    pub fn output_len(&self) -> Option<usize> {
        match self.output.shape.as_slice() {
            [_, Some(len)] => Some(*len),
            _ => None,
        }
    }

    /// 保存済みのマップが期待する形状と一致するか検証する
    pub fn ensure_compatible(&self, expected: &TensorRoles) -> Result<()> {
        if self.version != expected.version {
            anyhow::bail!(
                "Unsupported role map version {} (expected {})",
                self.version,
                expected.version
            );
        }
        for role in [Role::Input, Role::Label, Role::Output] {
            let stored = self.get(role);
            let wanted = expected.get(role);
            if stored.shape != wanted.shape {
                anyhow::bail!(
                    "Checkpoint '{}' tensor has shape {} but the current configuration needs {}",
                    role.as_str(),
                    format_shape(&stored.shape),
                    format_shape(&wanted.shape)
                );
            }
        }
        Ok(())
    }
}

pub fn format_shape(shape: &[Option<usize>]) -> String {
    let dims: Vec<String> = shape
        .iter()
        .map(|d| d.map(|v| v.to_string()).unwrap_or_else(|| "N".to_string()))
        .collect();
    format!("[{}]", dims.join(", "))
}
