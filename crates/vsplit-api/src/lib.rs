//! Axum intake server for storage notifications.
//!
//! This crate provides:
//! - `POST /events`: subscription handshakes and object-created notifications
//! - Background pipeline runs for genuine new sources
//! - Optional raw-event archive and in-process single-flight guard
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{RunLauncher, SourceRunner};
pub use state::AppState;
