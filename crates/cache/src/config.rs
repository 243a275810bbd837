//! Controller configuration.
//!
//! Settings can be built programmatically, read from environment variables,
//! or loaded from a flat `key = value` TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::resize::SizeMode;

/// Configuration for the visibility scheduler and its workers.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Time between two visibility ticks
    pub poll_interval: Duration,
    /// Grace period before an invisible entry's texture is released
    pub unload_delay: Duration,
    /// Pixels added around the container's visible rectangle, so items just
    /// outside the viewport already count as visible
    pub visibility_margin: f32,
    /// Only count items lying entirely inside the (inflated) visible rectangle
    pub require_full_visibility: bool,
    /// How a scalar size request is applied
    pub size_mode: SizeMode,
    /// Decode worker threads. `0` decodes inline during `tick()`
    pub decode_workers: usize,
    /// Maximum number of decode jobs waiting for a worker
    pub decode_queue_capacity: usize,
    /// Run the tick loop on a background thread
    pub background_polling: bool,
    /// Inline decodes per tick when `decode_workers == 0` (`None` = all)
    pub decode_budget_per_tick: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            unload_delay: Duration::from_secs(10),
            visibility_margin: 0.0,
            require_full_visibility: false,
            size_mode: SizeMode::LongerAxis,
            decode_workers: 2,
            decode_queue_capacity: 16,
            background_polling: true,
            decode_budget_per_tick: None,
        }
    }
}

impl ControllerConfig {
    /// Configuration for hosts that drive everything from their own loop:
    /// no background threads, decodes run inside `tick()`.
    pub fn manual() -> Self {
        Self {
            decode_workers: 0,
            background_polling: false,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_unload_delay(mut self, delay: Duration) -> Self {
        self.unload_delay = delay;
        self
    }

    pub fn with_visibility_margin(mut self, margin: f32) -> Self {
        self.visibility_margin = margin;
        self
    }

    pub fn with_full_visibility(mut self, required: bool) -> Self {
        self.require_full_visibility = required;
        self
    }

    pub fn with_size_mode(mut self, mode: SizeMode) -> Self {
        self.size_mode = mode;
        self
    }

    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers;
        self
    }

    pub fn with_decode_queue_capacity(mut self, capacity: usize) -> Self {
        self.decode_queue_capacity = capacity;
        self
    }

    pub fn with_background_polling(mut self, enabled: bool) -> Self {
        self.background_polling = enabled;
        self
    }

    pub fn with_decode_budget(mut self, budget: Option<usize>) -> Self {
        self.decode_budget_per_tick = budget;
        self
    }

    /// Whether decode jobs run inside `tick()` instead of on workers.
    pub fn decodes_inline(&self) -> bool {
        self.decode_workers == 0
    }

    /// Check values that would stall or break the scheduler.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("poll_interval_ms".to_string()));
        }
        if !self.visibility_margin.is_finite() || self.visibility_margin < 0.0 {
            return Err(ConfigError::InvalidValue("visibility_margin".to_string()));
        }
        if self.decode_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "decode_queue_capacity".to_string(),
            ));
        }
        if self.decode_budget_per_tick == Some(0) {
            return Err(ConfigError::InvalidValue(
                "decode_budget_per_tick".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default configuration file location.
    ///
    /// - macOS: ~/Library/Application Support/lazyimg/controller.toml
    /// - Linux: ~/.config/lazyimg/controller.toml
    /// - Windows: %APPDATA%\lazyimg\controller.toml
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lazyimg").join("controller.toml"))
    }

    /// Loads the default configuration file if it exists, then applies
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match Self::default_config_path() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LAZYIMG_POLL_INTERVAL_MS`: tick interval in milliseconds (default: 100)
    /// - `LAZYIMG_UNLOAD_DELAY_MS`: unload grace period in milliseconds (default: 10000)
    /// - `LAZYIMG_VISIBILITY_MARGIN`: visibility margin in pixels (default: 0)
    /// - `LAZYIMG_DECODE_WORKERS`: decode worker threads (default: 2)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var("LAZYIMG_POLL_INTERVAL_MS") {
            self.poll_interval = Duration::from_millis(parse(&val, "LAZYIMG_POLL_INTERVAL_MS")?);
        }

        if let Ok(val) = std::env::var("LAZYIMG_UNLOAD_DELAY_MS") {
            self.unload_delay = Duration::from_millis(parse(&val, "LAZYIMG_UNLOAD_DELAY_MS")?);
        }

        if let Ok(val) = std::env::var("LAZYIMG_VISIBILITY_MARGIN") {
            self.visibility_margin = parse(&val, "LAZYIMG_VISIBILITY_MARGIN")?;
        }

        if let Ok(val) = std::env::var("LAZYIMG_DECODE_WORKERS") {
            self.decode_workers = parse(&val, "LAZYIMG_DECODE_WORKERS")?;
        }

        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// poll_interval_ms = 100
    /// unload_delay_ms = 10000
    /// visibility_margin = 0
    /// require_full_visibility = false
    /// size_mode = "longer_axis"
    /// decode_workers = 2
    /// decode_queue_capacity = 16
    /// background_polling = true
    /// decode_budget_per_tick = 4
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string. Unknown keys are ignored.
    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "poll_interval_ms" => {
                    config.poll_interval = Duration::from_millis(parse(value, key)?);
                }
                "unload_delay_ms" => {
                    config.unload_delay = Duration::from_millis(parse(value, key)?);
                }
                "visibility_margin" => config.visibility_margin = parse(value, key)?,
                "require_full_visibility" => config.require_full_visibility = parse(value, key)?,
                "size_mode" => {
                    config.size_mode = SizeMode::parse(value)
                        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))?;
                }
                "decode_workers" => config.decode_workers = parse(value, key)?,
                "decode_queue_capacity" => config.decode_queue_capacity = parse(value, key)?,
                "background_polling" => config.background_polling = parse(value, key)?,
                "decode_budget_per_tick" => {
                    config.decode_budget_per_tick = Some(parse(value, key)?);
                }
                _ => {}
            }
        }

        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path.as_ref(), self.to_toml())?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    fn to_toml(&self) -> String {
        let mut toml = format!(
            "# lazyimg controller configuration\n\
             poll_interval_ms = {}\n\
             unload_delay_ms = {}\n\
             visibility_margin = {}\n\
             require_full_visibility = {}\n\
             size_mode = \"{}\"\n\
             decode_workers = {}\n\
             decode_queue_capacity = {}\n\
             background_polling = {}\n",
            self.poll_interval.as_millis(),
            self.unload_delay.as_millis(),
            self.visibility_margin,
            self.require_full_visibility,
            self.size_mode.as_str(),
            self.decode_workers,
            self.decode_queue_capacity,
            self.background_polling,
        );
        if let Some(budget) = self.decode_budget_per_tick {
            toml.push_str(&format!("decode_budget_per_tick = {budget}\n"));
        }
        toml
    }
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_VARS: [&str; 4] = [
        "LAZYIMG_POLL_INTERVAL_MS",
        "LAZYIMG_UNLOAD_DELAY_MS",
        "LAZYIMG_VISIBILITY_MARGIN",
        "LAZYIMG_DECODE_WORKERS",
    ];

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.unload_delay, Duration::from_secs(10));
        assert_eq!(config.visibility_margin, 0.0);
        assert!(!config.require_full_visibility);
        assert_eq!(config.decode_workers, 2);
        assert!(config.background_polling);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_manual_config() {
        let config = ControllerConfig::manual();
        assert!(config.decodes_inline());
        assert!(!config.background_polling);
    }

    #[test]
    fn test_builder_methods() {
        let config = ControllerConfig::default()
            .with_poll_interval(Duration::from_millis(16))
            .with_unload_delay(Duration::from_millis(500))
            .with_visibility_margin(64.0)
            .with_full_visibility(true)
            .with_size_mode(SizeMode::BothAxes)
            .with_decode_workers(4)
            .with_decode_queue_capacity(8)
            .with_background_polling(false)
            .with_decode_budget(Some(3));

        assert_eq!(config.poll_interval, Duration::from_millis(16));
        assert_eq!(config.unload_delay, Duration::from_millis(500));
        assert_eq!(config.visibility_margin, 64.0);
        assert!(config.require_full_visibility);
        assert_eq!(config.size_mode, SizeMode::BothAxes);
        assert_eq!(config.decode_workers, 4);
        assert_eq!(config.decode_queue_capacity, 8);
        assert!(!config.background_polling);
        assert_eq!(config.decode_budget_per_tick, Some(3));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_poll = ControllerConfig::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(
            zero_poll.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "poll_interval_ms"
        ));

        let negative_margin = ControllerConfig::default().with_visibility_margin(-1.0);
        assert!(negative_margin.validate().is_err());

        let nan_margin = ControllerConfig::default().with_visibility_margin(f32::NAN);
        assert!(nan_margin.validate().is_err());

        let no_queue = ControllerConfig::default().with_decode_queue_capacity(0);
        assert!(no_queue.validate().is_err());

        let no_budget = ControllerConfig::manual().with_decode_budget(Some(0));
        assert!(no_budget.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ENV_VARS);

        env::set_var("LAZYIMG_POLL_INTERVAL_MS", "250");
        env::set_var("LAZYIMG_UNLOAD_DELAY_MS", "1500");
        env::set_var("LAZYIMG_VISIBILITY_MARGIN", "32.5");
        env::set_var("LAZYIMG_DECODE_WORKERS", "0");

        let config = ControllerConfig::from_env().unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.unload_delay, Duration::from_millis(1500));
        assert_eq!(config.visibility_margin, 32.5);
        assert_eq!(config.decode_workers, 0);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&ENV_VARS);

        for name in ENV_VARS {
            env::remove_var(name);
        }
        env::set_var("LAZYIMG_UNLOAD_DELAY_MS", "42");

        let config = ControllerConfig::from_env().unwrap();
        assert_eq!(config.unload_delay, Duration::from_millis(42));
        assert_eq!(config.poll_interval, Duration::from_millis(100)); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&["LAZYIMG_DECODE_WORKERS"]);

        env::set_var("LAZYIMG_DECODE_WORKERS", "many");
        let result = ControllerConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue(key)) if key == "LAZYIMG_DECODE_WORKERS"
        ));
    }

    // Saves and restores environment variables around a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ControllerConfig::manual()
            .with_unload_delay(Duration::from_millis(750))
            .with_visibility_margin(12.0)
            .with_size_mode(SizeMode::BothAxes)
            .with_decode_budget(Some(2));
        let parsed = ControllerConfig::from_toml(&config.to_toml()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
            # only the delay
            unload_delay_ms = 3000
            not_a_key = 5
        "#;

        let config = ControllerConfig::from_toml(toml).unwrap();
        assert_eq!(config.unload_delay, Duration::from_secs(3));
        assert_eq!(config.decode_workers, 2); // default
    }

    #[test]
    fn test_from_toml_invalid_size_mode() {
        let result = ControllerConfig::from_toml("size_mode = \"diagonal\"");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue(key)) if key == "size_mode"
        ));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("controller.toml");

        let config = ControllerConfig::default().with_poll_interval(Duration::from_millis(33));
        config.save_to_file(&path).unwrap();

        let loaded = ControllerConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_from_missing_file() {
        let result = ControllerConfig::from_file("/no/such/controller.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
