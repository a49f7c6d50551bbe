pub mod classifier;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod extract;
pub mod logs;
pub mod output;
pub mod platform;
pub mod scan;
pub mod ui;
