pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod migrate;
pub mod rls;
pub mod rollout;
