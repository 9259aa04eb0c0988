pub mod engine;

pub use engine::{
    CategoryCoverage, CategoryReport, CoverageFeasibility, CoverageReport, MatchReport,
    SchedulerEngine,
};
