use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::util::get_running_path;

/// Top-level mapping that carries the logging keys.
pub const DEFAULT_SECTION: &str = "DEFAULT";
pub const DEFAULT_LOG_LEVEL: &str = "DEBUG";
/// Environment variable consulted when `LOG_PATH` is absent from the configuration.
pub const LOG_PATH_ENV: &str = "LOG_PATH";
pub const LOG_FILE_NAME: &str = "AdcircSupportTools.log";
/// Default configuration location, relative to the executable's directory.
pub const DEFAULT_CONFIG_PATH: &str = "../config/main.yml";

const KEY_LOGGING: &str = "LOGGING";
const KEY_LOG_LEVEL: &str = "LOGLEVEL";
const KEY_LOG_PATH: &str = "LOG_PATH";

/// A parsed YAML configuration document. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    doc: Value,
}

impl Config {
    pub fn from_value(doc: Value) -> Self {
        Self { doc }
    }

    /// Parse a configuration held in memory.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let doc = serde_yaml::from_str(text).map_err(Error::YamlDocument)?;
        Ok(Self::from_value(doc))
    }

    pub fn value(&self) -> &Value {
        &self.doc
    }

    /// Top-level mapping named `name`, if present.
    pub fn section(&self, name: &str) -> Option<&Mapping> {
        self.doc.get(name).and_then(Value::as_mapping)
    }

    /// Value of `key` inside the top-level mapping `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.doc.get(section).and_then(|s| s.get(key))
    }

    /// Deserialize the top-level mapping `name` into `T`.
    pub fn section_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .doc
            .get(name)
            .ok_or_else(|| Error::MissingSection(name.to_string()))?;
        serde_yaml::from_value(value.clone()).map_err(|e| Error::InvalidValue {
            key: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn logging(&self) -> Result<LoggingSection> {
        LoggingSection::from_config(self)
    }
}

/// Typed view of the logging keys under `DEFAULT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSection {
    pub enabled: bool,
    pub log_level: String,
    pub log_path: Option<String>,
}

impl LoggingSection {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let section = cfg
            .section(DEFAULT_SECTION)
            .ok_or_else(|| Error::MissingSection(DEFAULT_SECTION.to_string()))?;

        let enabled = match section.get(KEY_LOGGING) {
            None | Some(Value::Null) => false,
            Some(v) => parse_flag(KEY_LOGGING, v)?,
        };
        let log_level = optional_string(section, KEY_LOG_LEVEL)?
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_path = optional_string(section, KEY_LOG_PATH)?;

        Ok(Self {
            enabled,
            log_level,
            log_path,
        })
    }

    /// Resolve the log directory: `LOG_PATH` from the configuration, then the
    /// `LOG_PATH` environment variable as reported by `env`, then `"."`.
    /// An instance identifier adds one more path component.
    pub fn log_dir_with<F>(&self, env: F, instance: Option<&str>) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = self
            .log_path
            .clone()
            .or_else(|| env(LOG_PATH_ENV))
            .unwrap_or_else(|| ".".to_string());
        let base = PathBuf::from(base);
        match instance {
            Some(id) => base.join(id),
            None => base,
        }
    }

    pub fn log_file_path_with<F>(&self, env: F, instance: Option<&str>) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        self.log_dir_with(env, instance).join(LOG_FILE_NAME)
    }

    pub fn log_dir(&self, instance: Option<&str>) -> PathBuf {
        self.log_dir_with(process_env, instance)
    }

    pub fn log_file_path(&self, instance: Option<&str>) -> PathBuf {
        self.log_file_path_with(process_env, instance)
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn optional_string(section: &Mapping, key: &str) -> Result<Option<String>> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Error::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a string, found {other:?}"),
        }),
    }
}

fn parse_flag(key: &str, value: &Value) -> Result<bool> {
    let invalid = |reason: String| Error::InvalidValue {
        key: key.to_string(),
        reason,
    };
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i != 0),
            None => Err(invalid(format!("expected an integer flag, found {n}"))),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" | "" => Ok(false),
            _ => Err(invalid(format!("`{s}` is not a boolean"))),
        },
        other => Err(invalid(format!("expected a boolean, found {other:?}"))),
    }
}

/// `<executable dir>/../config/main.yml`.
pub fn default_config_path() -> Result<PathBuf> {
    let dir = get_running_path().map_err(|_| Error::MissingConfigPath)?;
    Ok(dir.join(DEFAULT_CONFIG_PATH))
}

/// Load the main configuration document.
///
/// `None` is a [`Error::MissingConfigPath`]; the caller decides whether that
/// ends the process. A path that does not exist is [`Error::NotFound`].
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.ok_or(Error::MissingConfigPath)?;
    let doc = read_config_yml(path)?;
    println!("Opened config file {}", path.display());
    Ok(Config::from_value(doc))
}

/// Read an arbitrary YAML file.
pub fn read_config_yml<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_yaml::from_str(&content).map_err(|source| Error::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Read an arbitrary JSON file.
pub fn read_json_file<P: AsRef<Path>>(path: P) -> Result<serde_json::Value> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn section(yaml: &str) -> LoggingSection {
        Config::from_yaml_str(yaml).unwrap().logging().unwrap()
    }

    #[test]
    fn test_load_config_nested_mapping() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("main.yml");
        fs::write(
            &path,
            "DEFAULT:\n  LOGGING: true\n  LOGLEVEL: INFO\nTHREDDS:\n  server:\n    host: tds.renci.org\n    ports: [80, 443]\n",
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.get("DEFAULT", "LOGLEVEL"), Some(&Value::from("INFO")));
        assert_eq!(
            cfg.value()["THREDDS"]["server"]["host"].as_str(),
            Some("tds.renci.org")
        );
        assert_eq!(cfg.value()["THREDDS"]["server"]["ports"][1].as_u64(), Some(443));
        assert!(cfg.section("THREDDS").is_some());
        assert!(cfg.section("MISSING").is_none());
    }

    #[test]
    fn test_load_config_without_path() {
        assert!(matches!(load_config(None), Err(Error::MissingConfigPath)));
    }

    #[test]
    fn test_load_config_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.yml");
        match load_config(Some(&path)) {
            Err(Error::NotFound { path: p }) => assert_eq!(p, path),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_yaml_keeps_parser_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yml");
        fs::write(&path, "DEFAULT: [unclosed\n").unwrap();

        let err = read_config_yml(&path).unwrap_err();
        assert!(matches!(err, Error::Yaml { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_read_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meta.json");
        fs::write(&path, r#"{"stations": {"8651370": {"lat": 36.18}}}"#).unwrap();

        let doc = read_json_file(&path).unwrap();
        assert_eq!(doc["stations"]["8651370"]["lat"].as_f64(), Some(36.18));

        let missing = read_json_file(temp_dir.path().join("none.json"));
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_section_as_typed() {
        #[derive(Debug, serde::Deserialize)]
        struct Contrails {
            domain: String,
            systemkey: String,
        }

        let cfg = Config::from_yaml_str(
            "DEFAULT:\n  domain: https://example.onerain.com\n  systemkey: abc-123\n",
        )
        .unwrap();
        let contrails: Contrails = cfg.section_as(DEFAULT_SECTION).unwrap();
        assert_eq!(contrails.domain, "https://example.onerain.com");
        assert_eq!(contrails.systemkey, "abc-123");

        assert!(matches!(
            cfg.section_as::<Contrails>("NOAA"),
            Err(Error::MissingSection(_))
        ));
        let bad = Config::from_yaml_str("DEFAULT:\n  domain: only\n").unwrap();
        assert!(matches!(
            bad.section_as::<Contrails>(DEFAULT_SECTION),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_logging_section_defaults() {
        let s = section("DEFAULT:\n  LOGGING: true\n");
        assert!(s.enabled);
        assert_eq!(s.log_level, "DEBUG");
        assert_eq!(s.log_path, None);

        let s = section("DEFAULT:\n  LOGLEVEL: INFO\n");
        assert!(!s.enabled);
    }

    #[test]
    fn test_logging_section_requires_default() {
        let cfg = Config::from_yaml_str("OTHER:\n  LOGGING: true\n").unwrap();
        assert!(matches!(cfg.logging(), Err(Error::MissingSection(_))));
    }

    #[test]
    fn test_logging_flag_forms() {
        for (text, expected) in [
            ("true", true),
            ("'True'", true),
            ("yes", true),
            ("1", true),
            ("false", false),
            ("'False'", false),
            ("0", false),
        ] {
            let s = section(&format!("DEFAULT:\n  LOGGING: {text}\n"));
            assert_eq!(s.enabled, expected, "LOGGING: {text}");
        }

        let cfg = Config::from_yaml_str("DEFAULT:\n  LOGGING: maybe\n").unwrap();
        assert!(matches!(cfg.logging(), Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_from_yaml_str_reports_crate_error() {
        let err = Config::from_yaml_str("DEFAULT: [unclosed\n").unwrap_err();
        assert!(matches!(err, Error::YamlDocument(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_log_dir_reads_process_env() {
        static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        let _lock = ENV_LOCK.lock().unwrap();

        let s = section("DEFAULT:\n  LOGGING: true\n");
        let saved = std::env::var_os(LOG_PATH_ENV);
        // SAFETY: LOG_PATH is only touched by this test, under ENV_LOCK.
        unsafe { std::env::set_var(LOG_PATH_ENV, "/scratch/adcirc/logs") };
        let dir = s.log_dir(Some("ec95d"));
        let file = s.log_file_path(None);
        unsafe {
            match saved {
                Some(v) => std::env::set_var(LOG_PATH_ENV, v),
                None => std::env::remove_var(LOG_PATH_ENV),
            }
        }

        assert_eq!(dir, PathBuf::from("/scratch/adcirc/logs/ec95d"));
        assert_eq!(file, PathBuf::from("/scratch/adcirc/logs").join(LOG_FILE_NAME));
    }

    #[test]
    fn test_log_level_must_be_string() {
        let cfg = Config::from_yaml_str("DEFAULT:\n  LOGLEVEL: [DEBUG]\n").unwrap();
        assert!(matches!(cfg.logging(), Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_log_dir_prefers_config_value() {
        let s = section("DEFAULT:\n  LOGGING: true\n  LOG_PATH: /tmp/run1\n");
        let env = |_: &str| Some("/var/log/other".to_string());
        assert_eq!(s.log_dir_with(env, None), PathBuf::from("/tmp/run1"));
        assert_eq!(
            s.log_file_path_with(env, Some("jobA")),
            PathBuf::from("/tmp/run1/jobA/AdcircSupportTools.log")
        );
    }

    #[test]
    fn test_log_dir_falls_back_to_env() {
        let s = section("DEFAULT:\n  LOGGING: true\n");
        let env = |key: &str| (key == LOG_PATH_ENV).then(|| "/data/logs".to_string());
        assert_eq!(s.log_dir_with(env, None), PathBuf::from("/data/logs"));
        assert_eq!(
            s.log_dir_with(env, Some("hsofs")),
            PathBuf::from("/data/logs/hsofs")
        );
    }

    #[test]
    fn test_log_dir_falls_back_to_current_dir() {
        let s = section("DEFAULT:\n  LOGGING: true\n");
        assert_eq!(s.log_dir_with(no_env, None), PathBuf::from("."));
        assert_eq!(
            s.log_file_path_with(no_env, None),
            PathBuf::from(".").join(LOG_FILE_NAME)
        );
        assert_eq!(
            s.log_file_path_with(no_env, Some("id")),
            PathBuf::from("./id/AdcircSupportTools.log")
        );
    }

    #[test]
    fn test_default_config_path_is_exe_relative() {
        let path = default_config_path().unwrap();
        assert!(path.ends_with("../config/main.yml"));
    }
}
