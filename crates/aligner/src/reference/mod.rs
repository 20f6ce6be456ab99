//! Portable implementation of the monotonic boundary aligner.
//!
//! The banded recursion runs on whatever device the inputs live on; hard
//! paths are decoded on the host.

pub mod monotonic;

pub use monotonic::{align_energy, expand_features, MonotonicAligner};
