use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

mod helpers;
pub(crate) mod parse;
mod validate;

pub mod ast {
    pub use crate::validate::*;
}

/// Default location of the daemon settings file.
pub const DEFAULT_SETTINGS: &str = "/etc/persistence_health_monitor.toml";

pub fn parse(text: &str) -> Result<ast::Settings> {
    let parsed: parse::Settings =
        toml::from_str(text).context("Failed to parse daemon settings.")?;
    ast::Settings::validate(parsed).context("Failed to validate daemon settings.")
}

/// Load the settings file. An explicitly requested file must exist; when no
/// file is requested the default location is used if present and built-in
/// defaults otherwise. Environment overrides are applied last.
pub fn load(path: Option<&Path>) -> Result<ast::Settings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// [`load`] with the environment read through `lookup`.
pub fn load_with_env(
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ast::Settings> {
    let settings = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .context(format!("Unable to open settings file at {}", path.display()))?;
            parse(&text)?
        }
        None => match std::fs::read_to_string(DEFAULT_SETTINGS) {
            Ok(text) => parse(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings file at {DEFAULT_SETTINGS}, using defaults");
                ast::Settings::default()
            }
            Err(e) => {
                return Err(e).context(format!("Unable to open settings file at {DEFAULT_SETTINGS}"));
            }
        },
    };
    settings.with_env_overrides(lookup)
}
