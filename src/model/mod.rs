//! Factor weights and their online recalibration

pub mod updater;
pub mod weights;

pub use updater::{GradientAdjuster, LabeledExample, ModelUpdater, UpdateSummary, WeightAdjuster};
pub use weights::{WeightStore, WeightTable};
