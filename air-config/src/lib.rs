//! Configuration loading for the AIR playout engine.
//!
//! An embedded default YAML is merged with an optional user-supplied
//! override file (`AIR_CONFIG` pointing at a path), and individual scalar
//! keys can be overridden with `AIR_CONFIG__SECTION__KEY=value`
//! environment variables. The merged result is exposed as a process-wide
//! singleton via [`get_config`] covering the playout-specific schema
//! (house format, channel session parameters, evidence endpoint).

use std::{env, fs, path::Path, sync::Arc};

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

const DEFAULT_CONFIG: &str = include_str!("default.yaml");
const ENV_CONFIG_PATH: &str = "AIR_CONFIG";
const ENV_PREFIX: &str = "AIR_CONFIG__";

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(
        Config::load(env::var(ENV_CONFIG_PATH).ok().as_deref().unwrap_or(""))
            .expect("failed to load AIR configuration")
    );
}

/// Returns the process-wide configuration singleton, loaded once from the
/// embedded default merged with any `AIR_CONFIG` override and
/// `AIR_CONFIG__*` environment variables.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseFormat {
    pub width: u32,
    pub height: u32,
    pub fps_num: i64,
    pub fps_den: i64,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    pub epoch_drift_tolerance_us: i64,
    pub hold_max_ms: i64,
    pub video_lookahead_frames: usize,
    pub audio_lookahead_frames: usize,
    pub min_audio_prime_ms: i64,
    pub min_video_prime_frames: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsRunConfig {
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    pub spool_directory: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayoutConfig {
    pub control: ControlConfig,
    pub house_format: HouseFormat,
    pub session: SessionDefaults,
    pub asrun: AsRunConfig,
    pub evidence: EvidenceConfig,
}

/// Holds the merged, immutable configuration. Wrapped in `Arc` by
/// [`get_config`] rather than offering interior mutability — a session's
/// parameters are fixed at `StartBlockPlanSession` time (the epoch is
/// captured once and never corrected), so there is no runtime
/// config-mutation surface to protect.
pub struct Config {
    inner: PlayoutConfig,
}

impl Config {
    /// Loads the embedded default, merges an override file if `override_path`
    /// is non-empty, then applies `AIR_CONFIG__*` environment overrides.
    pub fn load(override_path: &str) -> Result<Self> {
        let mut value: Value =
            serde_yaml::from_str(DEFAULT_CONFIG).context("parsing embedded default config")?;

        if !override_path.is_empty() {
            let path = Path::new(override_path);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("reading config override {override_path}"))?;
                let override_value: Value = serde_yaml::from_str(&contents)
                    .with_context(|| format!("parsing config override {override_path}"))?;
                merge_yaml(&mut value, override_value);
            } else {
                tracing::warn!(path = override_path, "AIR_CONFIG path does not exist, using embedded defaults");
            }
        }

        apply_env_overrides(&mut value);

        let inner: PlayoutConfig =
            serde_yaml::from_value(value).context("deserializing merged configuration")?;
        Ok(Self { inner })
    }

    pub fn house_format(&self) -> &HouseFormat {
        &self.inner.house_format
    }

    pub fn session_defaults(&self) -> &SessionDefaults {
        &self.inner.session
    }

    pub fn control(&self) -> &ControlConfig {
        &self.inner.control
    }

    pub fn asrun(&self) -> &AsRunConfig {
        &self.inner.asrun
    }

    pub fn evidence(&self) -> &EvidenceConfig {
        &self.inner.evidence
    }

    /// The control-surface bind address, resolved to a concrete local IP
    /// via `air_utils::guess_local_ip` when the configured host is the
    /// unspecified address, so the advertised address is reachable by
    /// clients instead of the literal `0.0.0.0`.
    pub fn resolved_control_addr(&self) -> String {
        let addr = &self.inner.control.bind_addr;
        if let Some(port) = addr.strip_prefix("0.0.0.0:") {
            format!("{}:{port}", air_utils::guess_local_ip())
        } else {
            addr.clone()
        }
    }
}

/// Recursively merges `override_value` on top of `base`, in place.
/// Mappings merge key-by-key; any other value (scalar, sequence) replaces
/// the base wholesale.
fn merge_yaml(base: &mut Value, override_value: Value) {
    match (base, override_value) {
        (Value::Mapping(base_map), Value::Mapping(override_map)) => {
            for (k, v) in override_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (base_slot, override_value) => {
            *base_slot = override_value;
        }
    }
}

/// Applies `AIR_CONFIG__SECTION__KEY=value` environment variables onto
/// nested YAML mapping keys, e.g. `AIR_CONFIG__SESSION__HOLD_MAX_MS=3000`
/// overrides `session.hold_max_ms`. Values are parsed as YAML scalars so
/// numeric/bool overrides deserialize to the right type.
fn apply_env_overrides(value: &mut Value) {
    for (key, raw) in env::vars() {
        let Some(path) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = path.split("__").map(|s| s.to_ascii_lowercase()).collect();
        if segments.is_empty() {
            continue;
        }
        let parsed: Value = serde_yaml::from_str(&raw).unwrap_or(Value::String(raw));
        set_path(value, &segments, parsed);
    }
}

fn set_path(value: &mut Value, segments: &[String], new_value: Value) {
    let Value::Mapping(map) = value else {
        return;
    };
    if segments.len() == 1 {
        map.insert(Value::String(segments[0].clone()), new_value);
        return;
    }
    let key = Value::String(segments[0].clone());
    let entry = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Default::default()));
    set_path(entry, &segments[1..], new_value);
}

impl HouseFormat {
    /// Validates `fps_num`/`fps_den` are both positive. `air-core` owns the
    /// authoritative `RationalFps` type (and its GCD normalization); this
    /// crate only needs to reject an obviously broken config before a
    /// session ever starts, so it stays free of a dependency on `air-core`.
    pub fn validate_fps(&self) -> Result<()> {
        if self.fps_num > 0 && self.fps_den > 0 {
            Ok(())
        } else {
            Err(anyhow!(
                "invalid house_format fps {}/{}: both terms must be positive",
                self.fps_num,
                self.fps_den
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses() {
        let cfg = Config::load("").unwrap();
        assert_eq!(cfg.house_format().fps_num, 30);
        assert_eq!(cfg.session_defaults().hold_max_ms, 5000);
    }

    #[test]
    fn override_file_merges_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.yaml");
        fs::write(&path, "session:\n  hold_max_ms: 9000\n").unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.session_defaults().hold_max_ms, 9000);
        // untouched keys keep their default
        assert_eq!(cfg.house_format().fps_num, 30);
    }

    #[test]
    fn missing_override_path_falls_back_to_default() {
        let cfg = Config::load("/nonexistent/path.yaml").unwrap();
        assert_eq!(cfg.house_format().width, 1280);
    }
}
