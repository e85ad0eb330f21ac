#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod model;
pub mod pagination;
pub mod prefetch;
pub mod reddit;
pub mod runtime;
pub mod session;
pub mod store;
pub mod vote;
pub mod window;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
pub use error::{FeedError, FeedResult};
pub use store::{apply, Action, Command, FeedEvent, FeedSettings, FeedState};
