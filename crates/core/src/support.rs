use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{Config, default_config_path, load_config};
use crate::error::Result;
use crate::logger::{LoggingContext, init_logging};

/// Loads the main configuration and, the first time it is constructed
/// against a [`LoggingContext`], sets up the file logger it describes.
#[derive(Debug)]
pub struct ConfigLogger {
    config: Config,
    log_file_path: Option<PathBuf>,
}

impl ConfigLogger {
    /// Use `config` if given, otherwise load the file at
    /// [`default_config_path`].
    pub fn new(
        ctx: &mut LoggingContext,
        instance: Option<&str>,
        config: Option<Config>,
    ) -> Result<Self> {
        let config = match config {
            Some(config) => config,
            None => load_config(Some(&default_config_path()?))?,
        };
        Self::with_config(ctx, instance, config)
    }

    pub fn from_file(
        ctx: &mut LoggingContext,
        instance: Option<&str>,
        path: Option<&Path>,
    ) -> Result<Self> {
        let config = load_config(path)?;
        Self::with_config(ctx, instance, config)
    }

    fn with_config(ctx: &mut LoggingContext, instance: Option<&str>, config: Config) -> Result<Self> {
        let mut log_file_path = None;

        if !ctx.is_initialized() {
            let section = config.logging()?;
            if section.enabled {
                let handle = init_logging(&section, instance)?;
                let path = handle.log_file().to_path_buf();
                let level = handle.level();
                ctx.set(handle);
                ctx.in_scope(|| debug!(log_file = %path.display(), %level, "logging initialized"));
                log_file_path = Some(path);
            }
        }

        Ok(Self {
            config,
            log_file_path,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Set only on the construction that initialized logging.
    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_file_path.as_deref()
    }
}

/// Startup helper for pipeline entry points: load `config_file`, set up
/// logging under `subdir`, and hand back the configuration.
pub fn init_logging_from_file(
    ctx: &mut LoggingContext,
    subdir: Option<&str>,
    config_file: Option<&Path>,
) -> Result<Config> {
    ConfigLogger::from_file(ctx, subdir, config_file).map(ConfigLogger::into_config)
}
