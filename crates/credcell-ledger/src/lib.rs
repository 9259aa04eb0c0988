pub mod engine;

pub use engine::Ledger;
