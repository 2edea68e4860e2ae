//! Configuration vault – reads/writes `~/.glide/config.toml` (or the file
//! passed with `--config`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use glide_runtime::{MoverConfig, RigConfig, SchedulerConfig, VerticalKind};

/// Persisted configuration stored in `~/.glide/config.toml`.
///
/// Every section is optional in the file; missing fields take their
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlideConfig {
    pub rig: RigConfig,
    pub mover: MoverConfig,
    pub scheduler: SchedulerConfig,
}

/// Return the path to `~/.glide/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".glide").join("config.toml")
}

/// Load the config at `path`, falling back to defaults when the file does
/// not exist, and apply `GLIDE_*` overrides on top.
pub fn load(path: &Path) -> Result<GlideConfig, String> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the file at `path` as-is.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<GlideConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: GlideConfig = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `GLIDE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GLIDE_POLL_INTERVAL_MS` | `rig.poll_interval_ms` |
/// | `GLIDE_SKILL_TRIGGER_DISTANCE` | `mover.skill_trigger_distance` |
/// | `GLIDE_VERTICAL` | `mover.adjuster.vertical.kind` (`rope_climb` / `teleport`) |
/// | `GLIDE_PERFORMANCE_MULTIPLIER` | `scheduler.performance_multiplier` |
/// | `GLIDE_SEED` | `scheduler.seed` |
///
/// Unparseable values are ignored, as are non-finite or negative
/// multipliers.
pub fn apply_env_overrides(cfg: &mut GlideConfig) {
    if let Some(v) = env_parse::<u64>("GLIDE_POLL_INTERVAL_MS") {
        cfg.rig.poll_interval_ms = v;
    }
    if let Some(v) = env_parse::<f32>("GLIDE_SKILL_TRIGGER_DISTANCE") {
        cfg.mover.skill_trigger_distance = v;
    }
    if let Ok(v) = std::env::var("GLIDE_VERTICAL") {
        match v.as_str() {
            "rope_climb" => cfg.mover.adjuster.vertical.kind = VerticalKind::RopeClimb,
            "teleport" => cfg.mover.adjuster.vertical.kind = VerticalKind::Teleport,
            _ => {}
        }
    }
    if let Some(v) = env_parse::<f32>("GLIDE_PERFORMANCE_MULTIPLIER").filter(|v| v.is_finite() && *v >= 0.0) {
        cfg.scheduler.performance_multiplier = v.min(SchedulerConfig::MAX_PERFORMANCE_MULTIPLIER);
    }
    if let Some(v) = env_parse::<u64>("GLIDE_SEED") {
        cfg.scheduler.seed = Some(v);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

/// Write `cfg` to `path`, creating the parent directory if necessary.  The
/// directory is made private to the user and the file is written `0600`.
pub(crate) fn save_to(cfg: &GlideConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
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
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
