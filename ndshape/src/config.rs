#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use ndshape_parse::ParseConfig;
use ndshape_rt_native::Flags;
use thiserror::Error;

pub const CONFIG_FILE: &str = "ndshape.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("config error: {message}")]
#[diagnostic(code(ndshape::config))]
pub struct ConfigError {
    pub message: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    log: Option<String>,

    #[serde(default)]
    typedefs: BTreeMap<String, String>,

    #[serde(default)]
    buffer: BufferSection,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct BufferSection {
    #[serde(default = "yes")]
    own_strings: bool,
    #[serde(default = "yes")]
    own_bytes: bool,
    #[serde(default = "yes")]
    own_pointers: bool,
}

fn yes() -> bool {
    true
}

impl Default for BufferSection {
    fn default() -> Self {
        BufferSection {
            own_strings: true,
            own_bytes: true,
            own_pointers: true,
        }
    }
}

/// Settings after reading `ndshape.toml` (or the defaults when there is none).
#[derive(Clone, Debug)]
pub struct Settings {
    pub path: Option<PathBuf>,
    pub log: Option<String>,
    pub parse: ParseConfig,
    pub flags: Flags,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            path: None,
            log: None,
            parse: ParseConfig::default(),
            flags: Flags::OWN_ALL,
        }
    }
}

/// Register typedefs so that each one can use any other that does not depend on it.
fn resolve_typedefs(mut pending: BTreeMap<String, String>) -> Result<ParseConfig, ConfigError> {
    let mut config = ParseConfig::default();
    while !pending.is_empty() {
        let mut progressed = false;
        let mut last_error = None;
        for (name, body) in std::mem::take(&mut pending) {
            match config.add_typedef(&name, &body) {
                Ok(()) => progressed = true,
                Err(e) => {
                    last_error = Some(format!("typedef '{name}': {}", e.message));
                    pending.insert(name, body);
                }
            }
        }
        if !progressed {
            return Err(ConfigError {
                message: last_error.unwrap_or_else(|| "unresolvable typedefs".to_string()),
            });
        }
    }
    Ok(config)
}

pub fn parse_settings(raw: &str, path: Option<PathBuf>) -> Result<Settings, ConfigError> {
    let file: ConfigFile = toml::from_str(raw).map_err(|e| ConfigError {
        message: format!("failed to parse config: {e}"),
    })?;

    let mut flags = Flags::OWN_TYPE | Flags::OWN_DATA;
    if file.buffer.own_strings {
        flags = flags | Flags::OWN_STRINGS;
    }
    if file.buffer.own_bytes {
        flags = flags | Flags::OWN_BYTES;
    }
    if file.buffer.own_pointers {
        flags = flags | Flags::OWN_POINTERS;
    }

    Ok(Settings {
        path,
        log: file.log,
        parse: resolve_typedefs(file.typedefs)?,
        flags,
    })
}

/// Load `explicit`, or `ndshape.toml` from `dir` if present.
pub fn load_settings(explicit: Option<&Path>, dir: &Path) -> Result<Settings, ConfigError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let candidate = dir.join(CONFIG_FILE);
            if !candidate.exists() {
                return Ok(Settings::default());
            }
            candidate
        }
    };
    let raw = fs::read_to_string(&path).map_err(|e| ConfigError {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_settings(&raw, Some(path))
}
