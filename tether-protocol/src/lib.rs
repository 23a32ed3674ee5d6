//! The Tether-Protocol Crate
//!
//! MQTT 3.1.1 control packets and the byte-level codec that encodes and
//! decodes them.

#![warn(
    bare_trait_objects,
    dead_code,
    elided_lifetimes_in_paths,
    keyword_idents,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    redundant_semicolons,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_code,
    unreachable_patterns,
    unsafe_code,
    unused_allocation,
    unused_assignments,
    unused_imports,
    unused_must_use,
    unused_mut,
    unused_parens,
    unused_variables
)]

/// MQTT packet codec
pub mod codec;

/// Codec error taxonomy
pub mod error;

/// The MQTT control packets
pub mod packet;

/// QoS, packet identifiers and session modes
pub mod qos;

pub use crate::codec::*;
pub use crate::error::*;
pub use crate::packet::*;
pub use crate::qos::*;
