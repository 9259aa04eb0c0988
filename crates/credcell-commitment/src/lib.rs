pub mod engine;

pub use engine::{CommitmentCounts, CommitmentEngine};
