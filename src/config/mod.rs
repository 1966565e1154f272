//! Configuration loading and validation.
//!
//! The proxy is driven by a JSON file with a top-level `forward` array of
//! forwarding rules. The file is loaded once at startup and never
//! reloaded; a missing or malformed file is fatal, while an invalid
//! individual rule is skipped at bind time with a logged error.

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{ForwardConfig, ForwardRule, PortMap, Protocol, RuleStatus};
pub use validation::expand_rule;
