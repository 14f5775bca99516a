use std::path::PathBuf;
use std::str::FromStr;

/// Server configuration - immutable after load
#[derive(Debug, Clone)]
pub struct Config {
    pub http_host: String,
    pub http_port: u16,
    pub lobby_capacity: usize,
    pub target_count: usize,
    pub target_separation: f64,
    pub target_plane: f64,
    pub target_max_attempts: u32,
    pub target_start_delay_secs: i64,
    pub target_start_jitter_secs: i64,
    pub target_window_min_secs: i64,
    pub target_window_max_secs: i64,
    pub drawing_assets_dir: PathBuf,
    pub background_image: PathBuf,
    pub log_level: log::LevelFilter,
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8000,
            lobby_capacity: 4,
            target_count: 30,
            target_separation: 5.0,
            target_plane: 100.0,
            target_max_attempts: 10_000,
            target_start_delay_secs: 3,
            target_start_jitter_secs: 15,
            target_window_min_secs: 3,
            target_window_max_secs: 10,
            drawing_assets_dir: PathBuf::from("assets/drawings"),
            background_image: PathBuf::from("assets/background.png"),
            log_level: log::LevelFilter::Info,
            log_file: PathBuf::from("sketchlobby.log"),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SKETCHLOBBY_*` environment variables.
    /// Unparseable values are ignored and reported in the returned warnings.
    pub fn from_env() -> (Self, Vec<String>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<String>) {
        let mut config = Self::default();
        let mut env = EnvOverrides {
            lookup,
            warnings: Vec::new(),
        };

        if let Some(host) = env.raw("HTTP_HOST") {
            config.http_host = host;
        }
        env.parse("HTTP_PORT", &mut config.http_port);
        env.parse("LOBBY_CAPACITY", &mut config.lobby_capacity);
        env.parse("TARGET_COUNT", &mut config.target_count);
        env.parse("TARGET_SEPARATION", &mut config.target_separation);
        env.parse("TARGET_PLANE", &mut config.target_plane);
        env.parse("TARGET_MAX_ATTEMPTS", &mut config.target_max_attempts);
        env.parse(
            "TARGET_START_DELAY_SECS",
            &mut config.target_start_delay_secs,
        );
        env.parse(
            "TARGET_START_JITTER_SECS",
            &mut config.target_start_jitter_secs,
        );
        env.parse("TARGET_WINDOW_MIN_SECS", &mut config.target_window_min_secs);
        env.parse("TARGET_WINDOW_MAX_SECS", &mut config.target_window_max_secs);
        if let Some(dir) = env.raw("DRAWING_ASSETS_DIR") {
            config.drawing_assets_dir = PathBuf::from(dir);
        }
        if let Some(path) = env.raw("BACKGROUND_IMAGE") {
            config.background_image = PathBuf::from(path);
        }
        env.parse("LOG_LEVEL", &mut config.log_level);
        if let Some(path) = env.raw("LOG_FILE") {
            config.log_file = PathBuf::from(path);
        }

        let mut warnings = env.warnings;
        if config.lobby_capacity == 0 {
            warnings.push("SKETCHLOBBY_LOBBY_CAPACITY must be positive, using 4".to_string());
            config.lobby_capacity = 4;
        }
        if config.target_window_max_secs < config.target_window_min_secs {
            warnings.push("target window max is below min, clamping".to_string());
            config.target_window_max_secs = config.target_window_min_secs;
        }

        (config, warnings)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

/// `SKETCHLOBBY_*` lookups, collecting a warning per unparseable value
struct EnvOverrides<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> EnvOverrides<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("SKETCHLOBBY_{}", name))
    }

    fn parse<T: FromStr>(&mut self, name: &str, slot: &mut T) {
        let Some(raw) = self.raw(name) else { return };
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => self
                .warnings
                .push(format!("Ignoring invalid SKETCHLOBBY_{}={:?}", name, raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.http_port, 8000);
        assert_eq!(config.lobby_capacity, 4);
        assert_eq!(config.target_count, 30);
        assert_eq!(config.target_separation, 5.0);
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_env_overrides() {
        let (config, warnings) = Config::from_lookup(lookup(&[
            ("SKETCHLOBBY_HTTP_PORT", "9001"),
            ("SKETCHLOBBY_LOBBY_CAPACITY", "2"),
            ("SKETCHLOBBY_LOG_LEVEL", "debug"),
        ]));
        assert_eq!(config.http_port, 9001);
        assert_eq!(config.lobby_capacity, 2);
        assert_eq!(config.log_level, log::LevelFilter::Debug);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let (config, warnings) = Config::from_lookup(lookup(&[
            ("SKETCHLOBBY_HTTP_PORT", "not-a-port"),
            ("SKETCHLOBBY_LOBBY_CAPACITY", "0"),
        ]));
        assert_eq!(config.http_port, 8000);
        assert_eq!(config.lobby_capacity, 4);
        assert_eq!(warnings.len(), 2);
    }
}
