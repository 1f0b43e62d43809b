//! Configuration Loader
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. `config/pipeline.toml`, or the file named by `PIPELINE_CONFIG_PATH`
//! 3. `config/pipeline.{environment}.toml`
//! 4. `PIPELINE__SECTION__KEY` environment variables
//! 5. `DATABASE_URL`, when set

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::PipelineConfig;
use crate::error::PipelineResult;
use crate::logging::get_environment;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load using the detected environment and the default `config/` directory
    pub fn load() -> PipelineResult<PipelineConfig> {
        let environment = get_environment();
        let base_file = std::env::var("PIPELINE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config").join("pipeline.toml"));
        Self::load_with(&base_file, &environment)
    }

    /// Load with an explicit base file and environment name
    pub fn load_with(base_file: &Path, environment: &str) -> PipelineResult<PipelineConfig> {
        let env_file = Self::environment_file(base_file, environment);

        debug!(
            base = %base_file.display(),
            overlay = %env_file.display(),
            environment = %environment,
            "Loading pipeline configuration"
        );

        let config = Config::builder()
            .add_source(Config::try_from(&PipelineConfig::default())?)
            .add_source(File::from(base_file).required(false))
            .add_source(File::from(env_file.as_path()).required(false))
            .add_source(
                Environment::with_prefix("PIPELINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut pipeline_config: PipelineConfig = config.try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                pipeline_config.database.url = url;
            }
        }

        pipeline_config.validate()?;

        info!(
            environment = %environment,
            backend = ?pipeline_config.backend,
            database = %pipeline_config.redacted_database_url(),
            attempts = pipeline_config.job_policy.attempts,
            translation_concurrency = pipeline_config.workers.translation_concurrency,
            "Configuration loaded"
        );

        Ok(pipeline_config)
    }

    /// `config/pipeline.toml` + `production` -> `config/pipeline.production.toml`
    fn environment_file(base_file: &Path, environment: &str) -> PathBuf {
        let stem = base_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("pipeline");
        let extension = base_file
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("toml");
        base_file.with_file_name(format!("{stem}.{environment}.{extension}"))
    }
}
