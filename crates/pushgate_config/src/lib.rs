use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::env;
use std::path::PathBuf;
use tracing::warn;

pub mod models;
pub use models::*;

/// Marker value that is replaced by an environment variable at load time.
pub const SECRET_MARKER: &str = "secret_from_env";

/// Loads the layered application configuration.
///
/// Sources, later ones winning:
/// 1. `config/default.*`
/// 2. `config/{RUN_ENV}.*` (`RUN_ENV` defaults to `debug`)
/// 3. environment variables with the `PUSHGATE` prefix and `__` as separator,
///    e.g. `PUSHGATE__QUEUE__ATTEMPTS=5`
///
/// The directory can be moved with `CONFIG_DIR`. Every string value equal to
/// [`SECRET_MARKER`] is then replaced from `PUSHGATE_SECRET_<PATH>`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    ensure_dotenv_loaded();

    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| "debug".to_string());
    let prefix = env::var("PREFIX").unwrap_or_else(|_| "PUSHGATE".to_string());
    let config_dir = PathBuf::from(env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string()));

    let default_path = config_dir.join("default");
    let env_path = config_dir.join(&run_env);

    let builder = Config::builder()
        .add_source(File::from(default_path).required(false))
        .add_source(File::from(env_path).required(false))
        .add_source(Environment::with_prefix(&prefix).separator("__"));

    let raw_config: AppConfig = builder.build()?.try_deserialize()?;
    apply_env_overrides_from_marker(raw_config)
}

/// Recursively replaces all [`SECRET_MARKER`] string values with environment variable values.
fn inject_env_secrets(value: &mut Value) {
    fn walk(path: Vec<String>, obj: &mut Value) {
        match obj {
            Value::Object(map) => {
                for (k, v) in map.iter_mut() {
                    let mut new_path = path.clone();
                    new_path.push(k.to_string());
                    walk(new_path, v);
                }
            }
            Value::String(s) if s == SECRET_MARKER => {
                let env_key = secret_env_key(&path);
                if let Ok(env_val) = env::var(&env_key) {
                    *obj = Value::String(env_val);
                } else {
                    warn!("env var {} not found for {}", env_key, SECRET_MARKER);
                }
            }
            _ => {}
        }
    }

    walk(vec![], value);
}

fn secret_env_key(path: &[String]) -> String {
    format!("PUSHGATE_SECRET_{}", path.join("_").to_uppercase())
}

/// Applies environment overrides based on [`SECRET_MARKER`] values in the serialized config.
pub fn apply_env_overrides_from_marker(config: AppConfig) -> Result<AppConfig, ConfigError> {
    let mut json = serde_json::to_value(&config)
        .map_err(|err| ConfigError::Message(format!("failed to serialize config: {err}")))?;
    inject_env_secrets(&mut json);
    serde_json::from_value(json)
        .map_err(|err| ConfigError::Message(format!("failed to rebuild config: {err}")))
}

static INIT_DOTENV: OnceCell<()> = OnceCell::new();

/// Loads the dotenv file once per process and returns the path that was used.
///
/// `DOTENV_OVERRIDE` wins over a first command line argument starting with `.env`,
/// which wins over the plain `.env` default. A missing file is not an error.
pub fn ensure_dotenv_loaded() -> String {
    let dotenv_path_override = env::var("DOTENV_OVERRIDE").ok();
    let dotenv_path_arg = env::args().nth(1).filter(|s| s.starts_with(".env"));

    let dotenv_path = dotenv_path_override
        .or(dotenv_path_arg)
        .unwrap_or_else(|| ".env".to_string());

    INIT_DOTENV.get_or_init(|| {
        dotenv::from_filename(&dotenv_path).ok();
    });

    dotenv_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_marker_is_replaced_from_env() {
        env::set_var("PUSHGATE_SECRET_PUSH_DEFAULTS_GCM_API_KEY", "from-env");
        let mut config = AppConfig::default();
        config.push.defaults.gcm = Some(json!({ "api_key": SECRET_MARKER }));

        let config = apply_env_overrides_from_marker(config).unwrap();

        assert_eq!(
            config.push.defaults.gcm,
            Some(json!({ "api_key": "from-env" }))
        );
    }

    #[test]
    fn missing_secret_keeps_marker() {
        let mut config = AppConfig::default();
        config.callback_uri = SECRET_MARKER.to_string();

        let config = apply_env_overrides_from_marker(config).unwrap();

        assert_eq!(config.callback_uri, SECRET_MARKER);
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let config: AppConfig = serde_json::from_value(json!({
            "server": { "host": "0.0.0.0", "port": 9000 },
            "callback_uri": "https://push.example.com/callback",
            "queue": { "attempts": 5 }
        }))
        .unwrap();

        assert_eq!(config.queue.attempts, 5);
        assert_eq!(config.queue.backoff_ms, 1_000);
        assert_eq!(config.queue.concurrency, 1);
        assert!(!config.push.use_fcm_v1);
        assert_eq!(config.push.endpoints.gcm, "https://fcm.googleapis.com/fcm/send");
        assert!(config.database.is_none());
    }
}
