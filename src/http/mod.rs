//! HTTP lookup API

pub mod handler;
pub mod server;

pub use server::{router, AppState, HttpServer};
