//! Daemon configuration
//!
//! TOML file under the XDG config dir, overridden by command-line flags and
//! resolved into [`SessionOptions`].

mod defaults;
mod loader;
mod options;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use options::{env_truthy, parse_idle_timeout, SessionOptions};
pub use schema::*;
