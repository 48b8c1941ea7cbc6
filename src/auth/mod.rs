//! Digest/Basic auth engine (C1).
//!
//! Two algorithms over the same message shape (method, URI path, body,
//! credentials) — spec §4.1.

pub mod basic;
pub mod digest;

pub use basic::basic_header;
pub use digest::{parse_www_authenticate, Challenge, DigestAnswer};

/// Which scheme a 401 challenge named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Basic,
    Digest,
}
