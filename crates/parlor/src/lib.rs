//! # parlor
//!
//! Binary crate for the Parlor server: CLI parsing, process wiring, and the
//! stdio execution backend.

#![deny(unsafe_code)]

pub mod backend;
