use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::{ConfigError, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::ValidationError;

/// Directory holding the configuration files, relative to the application root.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variable overrides, e.g. `APP_SYNC__SYNC_EXPIRY_MS`.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator of nested keys in environment variable overrides.
const ENV_SEPARATOR: &str = "__";

/// Configuration structures that [`load_config`] can produce.
pub trait Config: DeserializeOwned {
    /// Rejects values that deserialize but cannot be used.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// File layers, applied in declaration order. Later layers override earlier ones.
#[derive(Debug, Clone, Copy)]
enum FileLayer {
    Base,
    Environment(Environment),
}

impl FileLayer {
    fn stem(self) -> &'static str {
        match self {
            FileLayer::Base => "base",
            FileLayer::Environment(environment) => environment.as_str(),
        }
    }
}

impl fmt::Display for FileLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileLayer::Base => f.write_str("base configuration"),
            FileLayer::Environment(environment) => write!(f, "{environment} configuration"),
        }
    }
}

/// Errors returned while loading, merging or validating the configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("no {layer} found in `{directory}`, expected one of {expected}")]
    MissingFile {
        layer: String,
        directory: PathBuf,
        expected: String,
    },

    #[error("failed to read {layer} from `{path}`: {source}")]
    InvalidFile {
        layer: String,
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("failed to merge configuration sources: {0}")]
    Merge(#[source] ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] ConfigError),

    #[error("configuration is invalid: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads and validates the configuration rooted at the current working directory.
///
/// `configuration/base.*` is read first, then `configuration/{environment}.*` with the
/// environment taken from `APP_ENVIRONMENT`, then `APP_`-prefixed environment variables with
/// `__` between nested keys.
pub fn load_config<T: Config>() -> Result<T, LoadConfigError> {
    let root = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&root, environment)
}

/// Loads and validates the configuration rooted at `root` for an explicit environment.
pub fn load_config_from<T: Config>(
    root: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError> {
    let directory = root.join(CONFIGURATION_DIR);
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory));
    }

    let mut builder = rust_cli_config::Config::builder();
    for layer in [FileLayer::Base, FileLayer::Environment(environment)] {
        let path = locate_file(&directory, layer)?;
        check_file(&path, layer)?;
        builder = builder.add_source(File::from(path));
    }

    let overrides = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);
    let settings = builder
        .add_source(overrides)
        .build()
        .map_err(LoadConfigError::Merge)?;

    let config: T = settings
        .try_deserialize()
        .map_err(LoadConfigError::Deserialization)?;
    config.validate()?;

    Ok(config)
}

fn locate_file(directory: &Path, layer: FileLayer) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", layer.stem())))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    Err(LoadConfigError::MissingFile {
        layer: layer.to_string(),
        directory: directory.to_path_buf(),
        expected: candidates
            .iter()
            .map(|path| format!("`{}`", path.display()))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Parses one file on its own so that a malformed file is reported by path.
fn check_file(path: &Path, layer: FileLayer) -> Result<(), LoadConfigError> {
    rust_cli_config::Config::builder()
        .add_source(File::from(path))
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::InvalidFile {
            layer: layer.to_string(),
            path: path.to_path_buf(),
            source,
        })
}
