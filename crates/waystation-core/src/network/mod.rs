//! Network capability for strategies and warm-up.
//!
//! This module provides:
//! - The [`Fetcher`] trait every network backend implements
//! - Deadline enforcement that cancels slow fetches
//! - A reqwest-backed HTTP fetcher
//! - A scripted in-memory network for tests and offline demos

mod client;
mod fetcher;
mod scripted;

pub use client::HttpFetcher;
pub use fetcher::{fetch_with_timeout, DynFetcher, Fetcher};
pub use scripted::{Reply, ScriptedNetwork};
