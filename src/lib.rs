#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod classify;
pub mod clock;
pub mod config;
pub mod controller;
pub mod locate;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod service;
pub mod sim;
pub mod storage;
pub mod surface;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
