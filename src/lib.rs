#![allow(clippy::uninlined_format_args)]

pub mod admin;
pub mod app;
pub mod cache;
pub mod collab;
pub mod comments;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod hover;
pub mod markup;
pub mod module;
pub mod post;
pub mod scroll;
pub mod session;
pub mod target;
pub mod throttle;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
