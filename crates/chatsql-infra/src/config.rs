//! Environment-based configuration loading
//!
//! Layers `CHATSQL_`-prefixed environment variables over the defaults in
//! `chatsql_types::config::AppConfig`, using the `config` crate the way
//! the teacher's root crate declares it (double-underscore separates
//! nested keys, e.g. `CHATSQL_SERVER__PORT=9000`).

use chatsql_types::config::AppConfig;
use chatsql_types::{ChatSqlError, Result};

pub fn load() -> Result<AppConfig> {
    let defaults = AppConfig::default();
    let defaults_json = serde_json::to_value(&defaults)?;

    let builder = config::Config::builder()
        .add_source(config::Config::try_from(&defaults_json).map_err(|e| {
            ChatSqlError::Internal(format!("failed to seed config defaults: {e}"))
        })?)
        .add_source(
            config::Environment::with_prefix("CHATSQL")
                .separator("__")
                .try_parsing(true),
        );

    let built = builder
        .build()
        .map_err(|e| ChatSqlError::Internal(format!("failed to build config: {e}")))?;

    built
        .try_deserialize()
        .map_err(|e| ChatSqlError::Internal(format!("failed to deserialize config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_with_no_env_vars_set() {
        let cfg = load().expect("config should load from defaults alone");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.agent.max_iterations, 8);
    }

    #[test]
    fn env_var_overrides_nested_field() {
        std::env::set_var("CHATSQL_SERVER__PORT", "9999");
        let cfg = load().expect("config should load");
        assert_eq!(cfg.server.port, 9999);
        std::env::remove_var("CHATSQL_SERVER__PORT");
    }
}
