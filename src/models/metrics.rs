//! Classification metrics: accuracy, per-class precision/recall/F1, and
//! the confusion matrix.
//!
//! All metrics are computed from (label, prediction) index pairs so they
//! are independent of the tensor backend.

use crate::models::TagType;
use serde::Serialize;
use std::fmt::Write as _;

/// Per-class metrics, as percentages.
#[derive(Debug, Clone, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Full evaluation metrics for one split.
#[derive(Debug, Clone, Serialize)]
pub struct EvalMetrics {
    /// Overall accuracy, percent
    pub accuracy: f64,
    /// Unweighted mean of per-class precision, percent
    pub macro_precision: f64,
    /// Unweighted mean of per-class recall, percent
    pub macro_recall: f64,
    /// Unweighted mean of per-class F1, percent
    pub macro_f1: f64,
    /// Per-class metrics in class-index order
    pub per_class: Vec<(TagType, ClassMetrics)>,
    /// Row = true class, column = predicted class
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl EvalMetrics {
    /// Compute metrics from (label, prediction) class-index pairs.
    ///
    /// Classes with zero support or zero predictions get zero
    /// precision/recall rather than NaN.
    pub fn compute(pairs: &[(usize, usize)], classes: &[TagType]) -> Self {
        let n = classes.len();
        let mut confusion = vec![vec![0usize; n]; n];
        let mut correct = 0usize;

        for &(label, pred) in pairs {
            if label < n && pred < n {
                confusion[label][pred] += 1;
                if label == pred {
                    correct += 1;
                }
            }
        }

        let total: usize = pairs.len();
        let accuracy = if total == 0 {
            0.0
        } else {
            100.0 * correct as f64 / total as f64
        };

        let mut per_class = Vec::with_capacity(n);
        for (idx, &class) in classes.iter().enumerate() {
            let tp = confusion[idx][idx];
            let support: usize = confusion[idx].iter().sum();
            let predicted: usize = confusion.iter().map(|row| row[idx]).sum();

            let precision = if predicted == 0 {
                0.0
            } else {
                100.0 * tp as f64 / predicted as f64
            };
            let recall = if support == 0 {
                0.0
            } else {
                100.0 * tp as f64 / support as f64
            };
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };

            per_class.push((
                class,
                ClassMetrics {
                    precision,
                    recall,
                    f1,
                    support,
                },
            ));
        }

        let macro_of = |f: fn(&ClassMetrics) -> f64| {
            per_class.iter().map(|(_, m)| f(m)).sum::<f64>() / n.max(1) as f64
        };

        Self {
            accuracy,
            macro_precision: macro_of(|m| m.precision),
            macro_recall: macro_of(|m| m.recall),
            macro_f1: macro_of(|m| m.f1),
            per_class,
            confusion_matrix: confusion,
        }
    }

    /// Render the per-class metrics as an aligned table.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<15} {:>10} {:>10} {:>10} {:>10}",
            "Class", "Precision", "Recall", "F1-Score", "Support"
        );
        let _ = writeln!(out, "{}", "-".repeat(60));
        for (class, m) in &self.per_class {
            let _ = writeln!(
                out,
                "{:<15} {:>9.2}% {:>9.2}% {:>9.2}% {:>10}",
                class.as_str(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            );
        }
        out
    }

    /// Render the confusion matrix as an aligned table.
    ///
    /// Rows are true labels, columns are predictions.
    pub fn render_confusion_matrix(&self, classes: &[TagType]) -> String {
        let width = classes
            .iter()
            .map(|c| c.as_str().len())
            .max()
            .unwrap_or(8)
            .max(6);

        let mut out = String::new();
        let _ = write!(out, "{:<w$}", "true\\pred", w = width + 2);
        for class in classes {
            let _ = write!(out, "{:>w$}", class.as_str(), w = width + 2);
        }
        let _ = writeln!(out);

        for (row_idx, class) in classes.iter().enumerate() {
            let _ = write!(out, "{:<w$}", class.as_str(), w = width + 2);
            for col_idx in 0..classes.len() {
                let _ = write!(
                    out,
                    "{:>w$}",
                    self.confusion_matrix[row_idx][col_idx],
                    w = width + 2
                );
            }
            let _ = writeln!(out);
        }
        out
    }
}
