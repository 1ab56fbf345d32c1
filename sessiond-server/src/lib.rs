//! sessiond-server: terminal session daemon
//!
//! Owns long-lived PTY sessions behind a Unix socket. Each session runs its
//! output through a terminal emulator and a kitty graphics decoder so that
//! clients can attach at any time, receive a faithful bootstrap of the
//! current screen, and then stream live output under credit-based flow
//! control.

pub mod config;
pub mod graphics;
pub mod handlers;
pub mod pty;
pub mod registry;
pub mod server;
pub mod session;
pub mod term;

pub use config::{AppConfig, ConfigLoader, SessionOptions};
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::Session;
