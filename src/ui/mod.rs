//! HTTP control API: effect editing, field catalog, plots, recording

pub mod handlers;
pub mod server;

pub use server::{AppState, WebServer};
