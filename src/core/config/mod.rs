mod parsing;
mod secret;
mod settings;
mod types;

pub(crate) use settings::MIN_TOKEN_BYTES;
pub(crate) use types::{AccessPolicy, ConfigError, Settings};
