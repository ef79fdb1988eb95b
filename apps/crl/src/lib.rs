//! # crl
//!
//! Library half of the `crl` binary: the command implementations and the
//! configuration loader, exposed so integration tests can drive them without
//! spawning a process.

pub mod cli;
pub mod config;
