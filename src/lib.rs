//! xprop - SGP4 satellite propagation core
//!
//! Parses two-line element sets, propagates them with SGP4/SDP4, expands
//! ISO-8601 time grids, converts between TEME and J2000 and streams the
//! resulting ephemerides in fixed-size chunks.

pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod grid;
pub mod metrics;
pub mod propagation;
pub mod stream;
pub mod time;
pub mod tle;

pub use error::{Result, XpropError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
