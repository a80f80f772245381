pub mod collector;
pub mod config;
pub mod fetch;
pub mod hours;
pub mod infra;
pub mod ml;
pub mod output;
pub mod records;
pub mod services;
pub mod stats;
