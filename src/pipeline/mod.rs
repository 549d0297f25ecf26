//! Pipeline stages: training, evaluation, and prediction.

pub mod evaluate;
pub mod predict;
pub mod train;

pub use evaluate::{evaluate, EvalReport, Misclassification};
pub use predict::{render_prediction, Predictor};
pub use train::{train, TrainReport};
