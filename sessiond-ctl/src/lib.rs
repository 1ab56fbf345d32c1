//! sessiond-ctl: control client for the session daemon
//!
//! [`Client`] speaks the newline-JSON control protocol, one connection per
//! request, and opens attach streams. The `sessiond-ctl` binary wraps it
//! for shell use.

pub mod cli;
pub mod client;
pub mod commands;

pub use client::{Client, Stream};
