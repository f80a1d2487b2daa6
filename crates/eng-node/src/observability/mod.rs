//! # Observability Module
//!
//! Structured logging for the eng node. Requests are traced by
//! `tower_http::trace::TraceLayer` in [`crate::api::create_router`].

mod logging;

pub use logging::{default_filter, init_logging, LogFormat};
