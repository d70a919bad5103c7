pub mod config;
pub mod error;
pub mod logger;
pub mod support;
pub mod util;

pub use config::{Config, LoggingSection, load_config, read_config_yml, read_json_file};
pub use error::{Error, Result};
pub use logger::{LoggerHandle, LoggingContext, init_logging};
pub use support::{ConfigLogger, init_logging_from_file};
