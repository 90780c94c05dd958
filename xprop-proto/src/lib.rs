//! gRPC protocol definitions for xprop
//!
//! Defines:
//! - `Propagator` - gRPC service interface (`Info`, `Prop`, `Ephem`)
//! - Request, response and ephemeris point messages
//! - Task- and point-scoped error markers
//!
//! Generated from `proto/xpropagator.proto`.

pub mod v1 {
    tonic::include_proto!("api.v1");
}

/// Encoded descriptors for gRPC server reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("xprop_descriptor");

pub use v1::propagator_client::PropagatorClient;
pub use v1::propagator_server::{Propagator, PropagatorServer};
pub use v1::*;
