//! LogLens: live viewer for structured log records streamed from a server.

mod cli;
mod levels;
pub mod loglens_core;
pub mod loglens_stream;
mod loglens_tui;
pub mod loglens_upload;
pub mod loglens_view;

pub use cli::{run, DynError};
