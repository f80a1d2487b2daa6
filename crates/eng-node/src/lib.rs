//! # eng Node
//!
//! HTTP and WebSocket node for engineering-file version control and live
//! collaboration.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         eng Node                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HTTP API Layer                                             │
//! │  • Projects, branches, commits, merges, tags                │
//! │  • Pull requests and reviews                                │
//! │  • Collaboration sessions                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WebSocket Layer                                            │
//! │  • /ws event stream (project:<id>, session:<id> channels)   │
//! │  • /ws/sessions/{id} cursors, viewports, heartbeats         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Storage Layer                                              │
//! │  • Content-addressed objects shared by every project        │
//! │  • Per-project branch and tag snapshots                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin eng-node -- --api-addr 127.0.0.1:8080
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Shared state, error mapping and the router
//! - [`vcs_api`] - Branch, commit, merge and tag endpoints
//! - [`collaboration_api`] - Pull request and review endpoints
//! - [`realtime_api`] - WebSocket endpoints and session management
//! - [`events`] - Domain event forwarding onto the realtime hub
//! - [`projects`] - Project registry over the object store
//! - [`config`] - Layered node configuration
//! - [`observability`] - Structured logging
//!
//! ## Example: Serving an in-memory node
//!
//! ```rust,no_run
//! use eng_node::api::{create_router, AppState};
//! use eng_node::events::spawn_background;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let state = AppState::in_memory();
//! spawn_background(&state);
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod collaboration_api;
pub mod config;
pub mod events;
pub mod observability;
pub mod projects;
pub mod realtime_api;
pub mod vcs_api;
