//! Configuration Vault – reads/writes `~/.smubus/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use smubus_hal::{BusLock, FileBusLock, ProcessBusLock};
use smubus_kernel::{CodeNameLocking, DispatcherConfig};

/// Which [`BusLock`] implementation guards the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Lock shared only by threads of this process.
    Process,
    /// Lock file shared by every process on the machine.
    #[default]
    File,
}

impl std::fmt::Display for LockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockBackend::Process => write!(f, "process"),
            LockBackend::File => write!(f, "file"),
        }
    }
}

/// Where SMU commands are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverBackend {
    /// In-process simulated APU.
    #[default]
    Sim,
}

impl std::fmt::Display for DriverBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverBackend::Sim => write!(f, "sim"),
        }
    }
}

/// Persisted configuration stored in `~/.smubus/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on waiting for the bus lock, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default)]
    pub lock_backend: LockBackend,

    /// Lock identity: the lock file path, or the in-process lock name.
    #[serde(default = "default_lock_path")]
    pub lock_path: String,

    /// Take the bus lock for code-name reads too.
    #[serde(default)]
    pub lock_code_name: bool,

    #[serde(default)]
    pub backend: DriverBackend,

    /// Driver module handed to the channel loader.
    #[serde(default = "default_driver_module")]
    pub driver_module: String,

    /// Words read by `pm dump` when no size is given.
    #[serde(default = "default_pm_table_words")]
    pub pm_table_words: usize,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}
fn default_lock_path() -> String {
    FileBusLock::default_path().display().to_string()
}
fn default_driver_module() -> String {
    "RyzenSMU.bin".to_string()
}
fn default_pm_table_words() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_backend: LockBackend::default(),
            lock_path: default_lock_path(),
            lock_code_name: false,
            backend: DriverBackend::default(),
            driver_module: default_driver_module(),
            pm_table_words: default_pm_table_words(),
        }
    }
}

impl Config {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            code_name_locking: if self.lock_code_name {
                CodeNameLocking::Locked
            } else {
                CodeNameLocking::Unlocked
            },
        }
    }

    /// Build the bus lock named by this config.
    pub fn open_lock(&self) -> Result<Arc<dyn BusLock>, String> {
        match self.lock_backend {
            LockBackend::Process => Ok(ProcessBusLock::named(&self.lock_path) as Arc<dyn BusLock>),
            LockBackend::File => FileBusLock::open(&self.lock_path)
                .map(|l| Arc::new(l) as Arc<dyn BusLock>)
                .map_err(|e| format!("Failed to open bus lock file {}: {}", self.lock_path, e)),
        }
    }
}

/// Return the path to `~/.smubus/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".smubus").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Load the config, falling back to defaults (plus env overrides) when the
/// file is missing.  Parse errors are returned.
pub fn load_or_default() -> Result<Config, String> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Apply `SMUBUS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SMUBUS_LOCK_TIMEOUT_MS` | `lock_timeout_ms` |
/// | `SMUBUS_LOCK_PATH` | `lock_path` |
/// | `SMUBUS_LOCK_CODE_NAME` | `lock_code_name` (`true` / `false`) |
/// | `SMUBUS_DRIVER_MODULE` | `driver_module` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SMUBUS_LOCK_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.lock_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("SMUBUS_LOCK_PATH") {
        cfg.lock_path = v;
    }
    if let Ok(v) = std::env::var("SMUBUS_LOCK_CODE_NAME")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.lock_code_name = flag;
    }
    if let Ok(v) = std::env::var("SMUBUS_DRIVER_MODULE") {
        cfg.driver_module = v;
    }
}

/// Save the config to disk, creating `~/.smubus/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_dispatcher_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.dispatcher_config(), DispatcherConfig::default());
        assert_eq!(cfg.lock_backend, LockBackend::File);
        assert_eq!(cfg.driver_module, "RyzenSMU.bin");
    }

    #[test]
    fn lock_code_name_maps_to_locked() {
        let cfg = Config {
            lock_code_name: true,
            lock_timeout_ms: 250,
            ..Config::default()
        };
        let dc = cfg.dispatcher_config();
        assert_eq!(dc.code_name_locking, CodeNameLocking::Locked);
        assert_eq!(dc.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            lock_backend: LockBackend::Process,
            lock_path: "bus0".to_string(),
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.lock_backend, LockBackend::Process);
        assert_eq!(loaded.lock_path, "bus0");
        assert_eq!(loaded.pm_table_words, 256);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("lock_timeout_ms = 1200\n").expect("parse");
        assert_eq!(cfg.lock_timeout_ms, 1200);
        assert_eq!(cfg.backend, DriverBackend::Sim);
        assert!(!cfg.lock_code_name);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("meta")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_smubus_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".smubus"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn file_lock_backend_opens_lock_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = Config {
            lock_path: dir.path().join("bus.lock").display().to_string(),
            ..Config::default()
        };
        let lock = cfg.open_lock().expect("lock opens");
        assert!(lock.acquire(Duration::from_millis(10)));
        lock.release();
    }

    #[test]
    fn file_lock_backend_reports_bad_path() {
        let cfg = Config {
            lock_path: "/nonexistent-dir/for/sure/bus.lock".to_string(),
            ..Config::default()
        };
        assert!(cfg.open_lock().is_err());
    }

    // Env-var tests touch process-global state, so each uses its own variable.

    #[test]
    fn apply_env_overrides_changes_lock_timeout() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("SMUBUS_LOCK_TIMEOUT_MS", "750") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.lock_timeout_ms, 750);
        unsafe { std::env::remove_var("SMUBUS_LOCK_TIMEOUT_MS") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_code_name_flag() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("SMUBUS_LOCK_CODE_NAME", "sometimes") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.lock_code_name);
        unsafe { std::env::remove_var("SMUBUS_LOCK_CODE_NAME") };
    }

    #[test]
    fn apply_env_overrides_changes_driver_module() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("SMUBUS_DRIVER_MODULE", "Custom.bin") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.driver_module, "Custom.bin");
        unsafe { std::env::remove_var("SMUBUS_DRIVER_MODULE") };
    }
}
