pub mod clear;
pub mod common;
pub mod completions;
pub mod config;
pub mod count;
pub mod enqueue;
pub mod list;
pub mod remove;
pub mod retry;
pub mod sync;
