//! Client pool orchestration
//!
//! - `seeding`: account balance seeding over the exchange's REST API
//! - `pool`: session threads, stop signalling, run summary

pub mod pool;
pub mod seeding;

pub use pool::{ClientPool, RunSummary, RunningPool, StopHandle};
pub use seeding::{currencies, AccountSeeder};
