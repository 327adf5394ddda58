//! Utility functions
//!
//! Pure helpers - time, randomization, hashing.

pub mod hash;
pub mod rand;
pub mod time;

pub use hash::sha256_hex;
