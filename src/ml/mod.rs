pub mod inference;
pub mod ml_model;
pub mod training;

pub use inference::{Classification, InferenceEngine};
pub use ml_model::{CatDogClassifier, ModelConfig, MIN_INPUT_SIZE};
pub use training::{train_model, TrainOptions, TrainingReport};
