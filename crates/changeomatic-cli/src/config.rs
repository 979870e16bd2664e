//! Kiosk configuration – reads/writes `~/.changeomatic/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use changeomatic_hal::sim::NoteFloat;
use changeomatic_runtime::KioskConfig;
use changeomatic_types::KioskError;
use serde::{Deserialize, Serialize};

/// Which notes the simulated hopper can pay change for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "yes")]
    pub note_5: bool,
    #[serde(default = "yes")]
    pub note_10: bool,
    #[serde(default = "yes")]
    pub note_20: bool,
    #[serde(default = "yes")]
    pub note_50: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            note_5: true,
            note_10: true,
            note_20: true,
            note_50: true,
        }
    }
}

/// Persisted kiosk configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Per-topic bus buffer; slow listeners lag past this many messages.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Seconds a device request may stay unanswered.  `0` keeps requests
    /// forever.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Attach in-process simulated devices.  Without them nothing on the
    /// bus answers the kiosk.
    #[serde(default = "yes")]
    pub simulate: bool,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn yes() -> bool {
    true
}
fn default_bus_capacity() -> usize {
    256
}
fn default_pending_timeout_secs() -> u64 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
            pending_timeout_secs: default_pending_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            simulate: true,
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), KioskError> {
        if self.bus_capacity == 0 {
            return Err(KioskError::Config("bus_capacity must be at least 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(KioskError::Config(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn kiosk_config(&self) -> KioskConfig {
        KioskConfig {
            pending_timeout: (self.pending_timeout_secs > 0)
                .then(|| Duration::from_secs(self.pending_timeout_secs)),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    pub fn note_float(&self) -> NoteFloat {
        NoteFloat {
            note_5: self.simulation.note_5,
            note_10: self.simulation.note_10,
            note_20: self.simulation.note_20,
            note_50: self.simulation.note_50,
        }
    }
}

/// Return the path to `~/.changeomatic/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".changeomatic").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, KioskError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, KioskError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        KioskError::Config(format!("Failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| KioskError::Config(format!("Failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply `CHANGEOMATIC_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CHANGEOMATIC_BUS_CAPACITY` | `bus_capacity` |
/// | `CHANGEOMATIC_PENDING_TIMEOUT_SECS` | `pending_timeout_secs` |
/// | `CHANGEOMATIC_SWEEP_INTERVAL_SECS` | `sweep_interval_secs` |
/// | `CHANGEOMATIC_SIMULATE` | `simulate` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CHANGEOMATIC_BUS_CAPACITY")
        && let Ok(n) = v.trim().parse::<usize>()
    {
        cfg.bus_capacity = n;
    }
    if let Ok(v) = std::env::var("CHANGEOMATIC_PENDING_TIMEOUT_SECS")
        && let Ok(n) = v.trim().parse::<u64>()
    {
        cfg.pending_timeout_secs = n;
    }
    if let Ok(v) = std::env::var("CHANGEOMATIC_SWEEP_INTERVAL_SECS")
        && let Ok(n) = v.trim().parse::<u64>()
    {
        cfg.sweep_interval_secs = n;
    }
    if let Ok(v) = std::env::var("CHANGEOMATIC_SIMULATE")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.simulate = flag;
    }
}

/// Save the config to disk, creating `~/.changeomatic/` if necessary.
pub fn save(cfg: &Config) -> Result<(), KioskError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), KioskError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            KioskError::Config(format!("Failed to create config directory: {e}"))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                KioskError::Config(format!("Failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| KioskError::Config(format!("Failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| KioskError::Config(format!("Failed to write config at {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::{Mutex, MutexGuard};

    /// Tests that read or write `CHANGEOMATIC_*` variables hold this.
    fn env_lock() -> MutexGuard<'static, ()> {
        static LOCK: Mutex<()> = Mutex::new(());
        LOCK.lock()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.bus_capacity, 256);
        assert_eq!(cfg.pending_timeout_secs, 30);
        assert_eq!(cfg.sweep_interval_secs, 5);
        assert!(cfg.simulate);
        assert_eq!(cfg.note_float(), NoteFloat::default());
    }

    #[test]
    fn kiosk_config_maps_zero_timeout_to_none() {
        let mut cfg = Config::default();
        assert_eq!(
            cfg.kiosk_config().pending_timeout,
            Some(Duration::from_secs(30))
        );
        cfg.pending_timeout_secs = 0;
        assert_eq!(cfg.kiosk_config().pending_timeout, None);
        assert_eq!(cfg.kiosk_config().sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_zero_capacity_and_interval() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());
        cfg.bus_capacity = 0;
        assert!(matches!(cfg.validate(), Err(KioskError::Config(_))));
        cfg.bus_capacity = 16;
        cfg.sweep_interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(KioskError::Config(_))));
    }

    #[test]
    fn roundtrip_default_config() -> Result<(), Box<dyn std::error::Error>> {
        let _env = env_lock();
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path)?;
        let loaded = load_from(&path)?.ok_or("config missing after save")?;
        assert_eq!(loaded.bus_capacity, 256);
        assert_eq!(loaded.simulation, SimulationConfig::default());
        Ok(())
    }

    #[test]
    fn partial_file_fills_in_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let _env = env_lock();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "simulate = false\n\n[simulation]\nnote_10 = false\n")?;

        let loaded = load_from(&path)?.ok_or("config missing")?;
        assert!(!loaded.simulate);
        assert_eq!(loaded.pending_timeout_secs, 30);
        assert_eq!(loaded.sweep_interval_secs, 5);
        assert_eq!(
            loaded.note_float(),
            NoteFloat {
                note_10: false,
                ..NoteFloat::default()
            }
        );
        Ok(())
    }

    #[test]
    fn garbage_file_is_a_config_error() -> Result<(), Box<dyn std::error::Error>> {
        let _env = env_lock();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "bus_capacity = \"lots\"")?;
        assert!(matches!(load_from(&path), Err(KioskError::Config(_))));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path)?;

        let file_mode = fs::metadata(&path)?.permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let parent = path.parent().ok_or("no parent")?;
        let dir_mode = fs::metadata(parent)?.permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        Ok(())
    }

    #[test]
    fn config_path_points_to_changeomatic_dir() {
        let p = config_path_for_home("/home/kiosk");
        assert_eq!(p, PathBuf::from("/home/kiosk/.changeomatic/config.toml"));
    }

    #[test]
    fn file_without_simulate_attaches_simulated_devices()
    -> Result<(), Box<dyn std::error::Error>> {
        let _env = env_lock();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "bus_capacity = 64\n")?;

        let loaded = load_from(&path)?.ok_or("config missing")?;
        assert_eq!(loaded.bus_capacity, 64);
        assert!(loaded.simulate);
        Ok(())
    }

    #[test]
    fn load_from_returns_none_when_missing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path)?.is_none());
        Ok(())
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn env_overrides_do_not_leak_into_file_loads() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "")?;
        for _ in 0..50 {
            let _env = env_lock();
            let loaded = load_from(&path)?.ok_or("config missing")?;
            assert_eq!(loaded, Config::default());
        }
        Ok(())
    }

    #[test]
    fn apply_env_overrides_changes_timeout() {
        let _env = env_lock();
        // SAFETY: every test touching CHANGEOMATIC_* holds the env lock.
        unsafe { std::env::set_var("CHANGEOMATIC_PENDING_TIMEOUT_SECS", "90") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.pending_timeout_secs, 90);
        unsafe { std::env::remove_var("CHANGEOMATIC_PENDING_TIMEOUT_SECS") };
    }

    #[test]
    fn apply_env_overrides_changes_simulate() {
        let _env = env_lock();
        // SAFETY: every test touching CHANGEOMATIC_* holds the env lock.
        unsafe { std::env::set_var("CHANGEOMATIC_SIMULATE", "off") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.simulate);
        unsafe { std::env::remove_var("CHANGEOMATIC_SIMULATE") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_capacity() {
        let _env = env_lock();
        // SAFETY: every test touching CHANGEOMATIC_* holds the env lock.
        unsafe { std::env::set_var("CHANGEOMATIC_BUS_CAPACITY", "plenty") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bus_capacity, 256);
        unsafe { std::env::remove_var("CHANGEOMATIC_BUS_CAPACITY") };
    }
}
