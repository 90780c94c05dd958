//! gRPC daemon for xprop
//!
//! Responsibilities:
//! - Translate `api.v1.Propagator` messages to dispatcher requests
//! - Stream ephemeris chunks back to callers
//! - Map domain errors to gRPC status codes
//! - Report build metadata through `Info`

pub mod convert;
pub mod grpc_server;
