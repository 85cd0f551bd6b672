pub mod backfill;
pub mod migrate;
pub mod report;
pub mod rollout;
pub mod setup;
