//! Wiring from configuration to a runnable [`Server`].

use std::path::Path;
use std::sync::Arc;

use rampart_config::{ConfigLoader, RampartConfig};
use rampart_middleware::{Handler, Pipeline};
use tracing::info;

use crate::error::ServerResult;
use crate::server::Server;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "RAMPART";

/// File loaded when no `--config` path is given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "rampart.toml";

/// Loads configuration: defaults, then the file, then `.env` and
/// `RAMPART__SECTION__KEY` overrides, then validation.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> ServerResult<RampartConfig> {
    let loader = ConfigLoader::new().with_defaults();
    let loader = match path {
        Some(path) => loader.with_file(path)?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };
    let config = loader.with_dotenv()?.with_env_prefix(ENV_PREFIX).load()?;
    Ok(config)
}

/// Builds the validator, pipeline and server described by `config`.
///
/// `handler` serves every non-built-in route; `None` answers 404.
pub fn build_server(
    config: &RampartConfig,
    handler: Option<Arc<dyn Handler>>,
) -> ServerResult<Server> {
    let validator = rampart_auth::from_config(&config.auth, &config.circuit_breaker)?;
    info!(validator = validator.name(), "token validator ready");

    let pipeline = Pipeline::from_config(config, validator)?;
    let mut builder = Server::builder()
        .config(config.server.clone())
        .pipeline(pipeline);
    if let Some(handler) = handler {
        builder = builder.handler(handler);
    }
    builder.build()
}
