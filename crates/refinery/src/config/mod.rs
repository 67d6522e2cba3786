pub mod loader;
pub mod schema;

pub use loader::{
    default_database_path, load_config, load_config_from_str, validate_config, ConfigFormat,
};
pub use schema::{Config, DelegateKind, LocalEngineConfig, RemoteEngineConfig};
