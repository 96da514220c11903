pub mod types;
pub mod error;
pub mod sleep;
pub mod retry;
pub mod logger;
pub mod settings;
pub mod commands;
pub mod pixel;
pub mod platform;
pub mod perception;
pub mod timing;
pub mod engine;
pub mod channel;
pub mod session;
pub mod duties;
pub mod control;
pub mod orchestrator;
