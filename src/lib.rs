pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod optimizer;
pub mod parallel;
pub mod sim;
pub mod stats;
