//! クラス名とラベルベクトルの対応（エンコーディング）

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{PreprocessError, PreprocessResult};

/// 1クラス分のエンコーディング
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEntry {
    /// クラス名（= サブディレクトリ名）
    pub name: String,
    /// ラベルベクトル
    pub label: Vec<f32>,
    /// 分類結果として表示する名前（例: "cats" -> "cat"）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ClassEntry {
    pub fn new(name: impl Into<String>, label: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            label,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// 表示名（未設定ならクラス名）
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// 順序付きのクラスエンコーディング
///
/// 不変条件: 1クラス以上、ラベル長はすべて等しく、クラス名とラベルはそれぞれ一意。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ClassEntry>", into = "Vec<ClassEntry>")]
pub struct ClassEncoding {
    classes: Vec<ClassEntry>,
}

impl ClassEncoding {
    pub fn new(classes: Vec<ClassEntry>) -> PreprocessResult<Self> {
        let Some(first) = classes.first() else {
            return Err(PreprocessError::InvalidEncoding(
                "at least one class is required".to_string(),
            ));
        };
        let label_len = first.label.len();
        if label_len == 0 {
            return Err(PreprocessError::InvalidEncoding(format!(
                "class '{}' has an empty label vector",
                first.name
            )));
        }

        let mut names = HashSet::new();
        for (i, class) in classes.iter().enumerate() {
            if class.label.len() != label_len {
                return Err(PreprocessError::InvalidEncoding(format!(
                    "class '{}' has label length {} (expected {})",
                    class.name,
                    class.label.len(),
                    label_len
                )));
            }
            if !names.insert(class.name.as_str()) {
                return Err(PreprocessError::InvalidEncoding(format!(
                    "duplicate class name '{}'",
                    class.name
                )));
            }
            if classes[..i].iter().any(|other| other.label == class.label) {
                return Err(PreprocessError::InvalidEncoding(format!(
                    "class '{}' reuses the label {:?}",
                    class.name, class.label
                )));
            }
        }

        Ok(Self { classes })
    }

    /// 指定順にワンホットベクトルを割り当てる
    pub fn one_hot<S: AsRef<str>>(names: &[S]) -> PreprocessResult<Self> {
        let classes = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut label = vec![0.0; names.len()];
                label[i] = 1.0;
                ClassEntry::new(name.as_ref(), label)
            })
            .collect();
        Self::new(classes)
    }

    /// cats: [1, 0] / dogs: [0, 1]
    pub fn cats_vs_dogs() -> Self {
        Self {
            classes: vec![
                ClassEntry::new("cats", vec![1.0, 0.0]).with_display_name("cat"),
                ClassEntry::new("dogs", vec![0.0, 1.0]).with_display_name("dog"),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// ラベルベクトルの長さ
    pub fn label_len(&self) -> usize {
        self.classes[0].label.len()
    }

    pub fn classes(&self) -> &[ClassEntry] {
        &self.classes
    }

    pub fn get(&self, name: &str) -> Option<&ClassEntry> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// モデル出力をクラスに戻す
    ///
    /// 出力の argmax とラベルの argmax が一致する最初のクラスを返す。
    pub fn decode(&self, output: &[f32]) -> Option<&ClassEntry> {
        if output.len() != self.label_len() {
            return None;
        }
        let predicted = argmax(output)?;
        self.classes
            .iter()
            .find(|c| argmax(&c.label) == Some(predicted))
    }
}

impl Default for ClassEncoding {
    fn default() -> Self {
        Self::cats_vs_dogs()
    }
}

impl TryFrom<Vec<ClassEntry>> for ClassEncoding {
    type Error = PreprocessError;

    fn try_from(classes: Vec<ClassEntry>) -> Result<Self, Self::Error> {
        Self::new(classes)
    }
}

impl From<ClassEncoding> for Vec<ClassEntry> {
    fn from(encoding: ClassEncoding) -> Self {
        encoding.classes
    }
}

/// 最大値の位置（同値なら先頭、空なら None）
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, current)) if v <= current => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoding() {
        let encoding = ClassEncoding::default();
        assert_eq!(encoding.len(), 2);
        assert_eq!(encoding.label_len(), 2);
        assert_eq!(encoding.get("cats").unwrap().label, vec![1.0, 0.0]);
        assert_eq!(encoding.get("dogs").unwrap().display(), "dog");
    }

    #[test]
    fn test_one_hot_assigns_in_order() {
        let encoding = ClassEncoding::one_hot(&["a", "b", "c"]).unwrap();
        assert_eq!(encoding.get("c").unwrap().label, vec![0.0, 0.0, 1.0]);
        assert_eq!(encoding.get("a").unwrap().display(), "a");
    }

    #[test]
    fn test_rejects_unequal_label_lengths() {
        let result = ClassEncoding::new(vec![
            ClassEntry::new("cats", vec![1.0, 0.0]),
            ClassEntry::new("dogs", vec![0.0, 1.0, 0.0]),
        ]);
        assert!(matches!(result, Err(PreprocessError::InvalidEncoding(_))));
    }

    #[test]
    fn test_rejects_duplicate_codes_and_names() {
        let same_code = ClassEncoding::new(vec![
            ClassEntry::new("cats", vec![1.0, 0.0]),
            ClassEntry::new("dogs", vec![1.0, 0.0]),
        ]);
        assert!(same_code.is_err());

        let same_name = ClassEncoding::new(vec![
            ClassEntry::new("cats", vec![1.0, 0.0]),
            ClassEntry::new("cats", vec![0.0, 1.0]),
        ]);
        assert!(same_name.is_err());

        assert!(ClassEncoding::new(Vec::new()).is_err());
    }

    #[test]
    fn test_decode_by_argmax() {
        let encoding = ClassEncoding::default();
        assert_eq!(encoding.decode(&[0.9, 0.1]).unwrap().name, "cats");
        assert_eq!(encoding.decode(&[-0.3, 0.2]).unwrap().name, "dogs");
        assert!(encoding.decode(&[1.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.5, 0.5, 0.1]), Some(0));
        assert_eq!(argmax(&[f32::NAN, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"[{"name":"cats","label":[1,0]},{"name":"dogs","label":[1,0]}]"#;
        assert!(serde_json::from_str::<ClassEncoding>(json).is_err());

        let json = r#"[{"name":"cats","label":[1,0],"display_name":"cat"},{"name":"dogs","label":[0,1]}]"#;
        let encoding: ClassEncoding = serde_json::from_str(json).unwrap();
        assert_eq!(encoding.classes()[0].display(), "cat");
    }
}
