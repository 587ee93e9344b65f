//! Core protocol types for the poly <-> EVM relayer.
//!
//! Everything that crosses a wire or lands in the store lives here: the poly
//! block header, the cross-chain payload types, the two persisted work items
//! and the canonical little-endian encoding they all share.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(unused_extern_crates)]

mod error;
pub mod traits;
pub mod types;

pub use error::ProtocolError;
pub use traits::{Decode, Encode};
pub use types::*;
