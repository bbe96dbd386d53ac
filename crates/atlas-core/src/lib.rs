//! # Atlas Core
//!
//! Walk-forward embedding and alignment engine for Market Atlas.
//!
//! Each trading day's ticker feature vectors are projected into 2D, rescaled
//! to a fixed canvas and rigidly aligned onto the previous day's layout so the
//! resulting time series animates without jitter or spin.
//!
//! ```text
//! FeatureStore -> Preprocessor -> Reducer (seeded) -> normalize -> Aligner -> records
//!                                    ^                                 |
//!                                    +------ previous frame layout ----+
//! ```

pub mod align;
pub mod error;
pub mod models;
pub mod normalize;
pub mod preprocess;
pub mod reducer;
pub mod stats;
pub mod store;
pub mod walk_forward;

pub use align::*;
pub use error::*;
pub use models::*;
pub use normalize::*;
pub use preprocess::*;
pub use reducer::{InitStrategy, Metric, Reducer, ReducerConfig, Seed};
pub use store::*;
pub use walk_forward::*;
