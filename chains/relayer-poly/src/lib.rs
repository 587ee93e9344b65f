//! Poly chain client: JSON-RPC access, native contract transactions, the
//! relayer wallet and the bridge fee service.

#![forbid(unsafe_code)]
#![warn(unused_extern_crates)]

mod bridge_fee;
mod error;
pub mod native;
mod rpc;
mod wallet;

pub use bridge_fee::*;
pub use error::*;
pub use rpc::*;
pub use wallet::*;
