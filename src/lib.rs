//! Shopgate - Sliding-Window Admission Control
//!
//! This crate implements the per-process rate limiter that sits in front of
//! the storefront HTTP services. Each limiter keeps an in-memory request log
//! per caller identity, answers admit/reject on every request, and compacts
//! its own state without any external storage.

pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod ratelimit;
