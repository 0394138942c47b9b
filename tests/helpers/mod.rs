//! Test helpers
//!
//! A PostgreSQL database and a Redis cache for flow tests, and a router
//! wrapper that drives requests through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

pub mod app;
pub mod cache;
pub mod database;

pub use app::*;
pub use cache::*;
pub use database::*;
