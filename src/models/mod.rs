pub mod config;
pub mod message;
pub mod progress;
pub mod settings;
pub mod task;
