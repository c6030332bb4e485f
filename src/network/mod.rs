//! Network Module
//!
//! HTTP server and connection handling.
//!
//! ## Architecture
//! - One tokio task accepts, one task per connection serves HTTP/1.1
//! - Admission is bounded by a tower load-shedding concurrency limit; a
//!   request over the bound gets 503 without being read or queued
//! - Requests are routed to the Engine by `crate::api`

mod server;

pub use server::{Server, ShutdownHandle};
