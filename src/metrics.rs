//! 学習ステップの計数と進捗表示

use std::collections::VecDeque;

/// 移動平均をとるステップ数
pub const ACCURACY_WINDOW: usize = 10;

/// 学習ステップカウンタ
///
/// 単調増加するステップ番号と、直近 `window` ステップの正解率の移動平均を保持する。
/// 移動平均はウィンドウが埋まるまで報告しない。
#[derive(Debug, Clone)]
pub struct StepCounter {
    step: usize,
    total: Option<usize>,
    window: usize,
    accuracies: VecDeque<f32>,
}

impl StepCounter {
    pub fn new(total: Option<usize>) -> Self {
        Self::with_window(total, ACCURACY_WINDOW)
    }

    pub fn with_window(total: Option<usize>, window: usize) -> Self {
        Self {
            step: 0,
            total,
            window: window.max(1),
            accuracies: VecDeque::with_capacity(window.max(1)),
        }
    }

    /// ステップを1つ進めて新しいステップ番号を返す
    pub fn advance(&mut self) -> usize {
        self.step += 1;
        self.step
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    /// 正解率（%）を記録し、ウィンドウが埋まっていれば移動平均を返す
    pub fn record_accuracy(&mut self, accuracy: f32) -> Option<f32> {
        if self.accuracies.len() == self.window {
            self.accuracies.pop_front();
        }
        self.accuracies.push_back(accuracy);
        self.moving_average()
    }

    pub fn moving_average(&self) -> Option<f32> {
        if self.accuracies.len() < self.window {
            return None;
        }
        Some(self.accuracies.iter().sum::<f32>() / self.accuracies.len() as f32)
    }

    /// `Step: 3/100 | Accuracy: WTNG | Objective: 0.71` 形式の1行
    pub fn report(&self, objective: f32) -> String {
        let total = self
            .total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string());
        let accuracy = self
            .moving_average()
            .map(|a| format!("{:.1}%", a))
            .unwrap_or_else(|| "WTNG".to_string());
        format!(
            "Step: {}/{} | Accuracy: {} | Objective: {:.6}",
            self.step, total, accuracy, objective
        )
    }
}
