use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix of environment variables that override configuration keys,
/// e.g. `GATEHOUSE_HTTPBIN` or `GATEHOUSE_LOG__LEVEL`.
pub const ENV_PREFIX: &str = "GATEHOUSE";

/// Load configuration using the config crate.
///
/// Sources, lowest precedence first: built-in defaults, the optional file
/// (YAML, JSON, TOML or INI by extension), `GATEHOUSE_*` environment variables,
/// then an explicit `httpbin` override (the `--httpbin` CLI flag).
pub async fn load_config(config_path: Option<&str>, httpbin: Option<&str>) -> Result<GatewayConfig> {
    load_config_sync(config_path, httpbin)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: Option<&str>, httpbin: Option<&str>) -> Result<GatewayConfig> {
    build_config(config_path, httpbin, env_source())
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

fn file_format(config_path: &Path) -> FileFormat {
    match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    }
}

fn build_config(
    config_path: Option<&str>,
    httpbin: Option<&str>,
    env: Environment,
) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        builder = builder.add_source(File::new(config_path, file_format(path)));
    }

    let settings = builder
        .add_source(env)
        .set_override_option("httpbin", httpbin)
        .wrap_err("Invalid httpbin override")?
        .build()
        .with_context(|| match config_path {
            Some(path) => format!("Failed to build config from {path}"),
            None => "Failed to build config from environment".to_string(),
        })?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .wrap_err("Failed to deserialize gateway configuration")?;

    tracing::debug!(
        routes = gateway_config.routes.len(),
        httpbin = %gateway_config.httpbin,
        "Configuration loaded"
    );

    Ok(gateway_config)
}
