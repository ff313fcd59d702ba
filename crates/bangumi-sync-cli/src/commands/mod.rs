pub mod clear;
pub mod config;
pub mod daemon;
pub mod export;
pub mod prompts;
pub mod sync;
pub mod sync_ui;
