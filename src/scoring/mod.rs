//! C5: GemScore — weighted composite scoring with deterministic,
//! explainable output.

pub mod delta;
pub mod normalize;
pub mod pipeline;
pub mod weights;

pub use pipeline::score;
pub use weights::AdaptiveWeights;
