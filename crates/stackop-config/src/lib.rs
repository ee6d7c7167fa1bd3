//! Configuration handling for stackop.
//!
//! This crate handles:
//! - Resolution of resource references (env, filesystem, secret, literal)
//! - Merging of checked-in, inline and referenced stack configuration
//! - Operator settings (environment variables or a KDL file)

pub mod error;
pub mod merge;
pub mod resolver;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use merge::{ConfigLayers, merge_config};
pub use resolver::Resolver;
pub use system::OperatorConfig;
