//! Canonical wire encoding.
//!
//! The poly chain serializes everything little-endian with a compact length
//! prefix (`varuint`): values below `0xfd` are one byte, then `0xfd` + u16,
//! `0xfe` + u32, `0xff` + u64. `varbytes` is `varuint(len)` followed by the
//! raw bytes; strings are varbytes of UTF-8.

mod encode;

pub use encode::*;
