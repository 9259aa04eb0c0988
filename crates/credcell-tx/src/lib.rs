pub mod engine;

pub use engine::{DrainReport, TransactionEngine};
