//! INI configuration: `./cdrip.conf`, then `~/.cdrip.conf`, then
//! built-in defaults. Inline `#`/`;` comments are stripped from values
//! when preceded by whitespace; quoted substrings protect delimiters.

use crate::cd::ripper::RipMode;
use crate::cddb::CddbServer;
use crate::cover_art::CoverArtPolicy;
use crate::cover_pipeline::DEFAULT_MAX_WIDTH;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_FORMAT: &str = "{album}/{tracknumber:02d}_{safetitle}.flac";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Everything the front end and engine read from configuration
#[derive(Debug, Clone)]
pub struct CdripConfig {
    /// Preferred drive; None means auto-detect
    pub device: Option<PathBuf>,
    pub format: String,
    /// FLAC compression level, negative for auto
    pub compression_level: i32,
    pub mode: RipMode,
    pub max_width: u32,
    pub repeat: bool,
    pub sort: bool,
    pub auto_mode: bool,
    pub speed_fast: bool,
    pub discogs: CoverArtPolicy,
    pub allow_aa: bool,
    pub filter_title: Option<Regex>,
    pub servers: Vec<CddbServer>,
    pub config_path: Option<PathBuf>,
}

fn builtin_servers() -> Vec<CddbServer> {
    vec![
        CddbServer {
            host: String::new(),
            port: 80,
            path: String::new(),
            label: "musicbrainz".to_string(),
        },
        CddbServer {
            host: "gnudb.gnudb.org".to_string(),
            port: 80,
            path: "/~cddb/cddb.cgi".to_string(),
            label: "gnudb".to_string(),
        },
        CddbServer {
            host: "freedb.dbpoweramp.com".to_string(),
            port: 80,
            path: "/~cddb/cddb.cgi".to_string(),
            label: "dbpoweramp".to_string(),
        },
    ]
}

impl Default for CdripConfig {
    fn default() -> Self {
        Self {
            device: None,
            format: DEFAULT_FORMAT.to_string(),
            compression_level: -1,
            mode: RipMode::Default,
            max_width: DEFAULT_MAX_WIDTH,
            repeat: false,
            sort: false,
            auto_mode: false,
            speed_fast: false,
            discogs: CoverArtPolicy::Always,
            allow_aa: true,
            filter_title: None,
            servers: builtin_servers(),
            config_path: None,
        }
    }
}

/// Strip an inline `#`/`;` comment that is preceded by whitespace,
/// honoring single/double quoting and backslash escapes.
fn strip_inline_comment(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'#' | b';' if !in_single && !in_double => {
                if i == 0 || bytes[i - 1].is_ascii_whitespace() {
                    return raw[..i].trim().to_string();
                }
            }
            _ => {}
        }
    }
    raw.trim().to_string()
}

fn parse_bool(raw: &str, key: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("expected boolean, got \"{}\"", other),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Flat `(section, key) -> value` view of an INI document. Later keys
/// override earlier ones.
fn parse_ini(text: &str) -> BTreeMap<(String, String), String> {
    let mut out = BTreeMap::new();
    let mut section = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim().to_lowercase();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            out.insert((section.clone(), key), strip_inline_comment(value));
        }
    }
    out
}

struct IniView {
    values: BTreeMap<(String, String), String>,
}

impl IniView {
    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.values
            .get(&(section.to_string(), key.to_string()))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

fn parse_servers(ini: &IniView) -> Result<Vec<CddbServer>, ConfigError> {
    let Some(ids_raw) = ini.get("cddb", "servers") else {
        return Ok(builtin_servers());
    };
    let ids = split_list(ids_raw);
    if ids.is_empty() {
        return Ok(builtin_servers());
    }

    let mut servers = Vec::with_capacity(ids.len());
    for id in ids {
        let prefix = id.to_lowercase();
        let label = ini
            .get("cddb", &format!("{}.label", prefix))
            .unwrap_or(&id)
            .to_string();
        let host = ini
            .get("cddb", &format!("{}.host", prefix))
            .unwrap_or_default()
            .to_string();
        let path = ini
            .get("cddb", &format!("{}.path", prefix))
            .unwrap_or_default()
            .to_string();
        let port = match ini.get("cddb", &format!("{}.port", prefix)) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: format!("cddb.{}.port", prefix),
                message: format!("expected port number, got \"{}\"", raw),
            })?,
            None => 80,
        };

        // The musicbrainz pseudo-server needs no endpoint.
        if label.to_lowercase() != "musicbrainz" && host.is_empty() {
            return Err(ConfigError::Invalid {
                key: format!("cddb.{}.host", prefix),
                message: "CDDB server needs a host".to_string(),
            });
        }
        servers.push(CddbServer {
            host,
            port,
            path,
            label,
        });
    }
    Ok(servers)
}

fn apply_ini(config: &mut CdripConfig, ini: &IniView) -> Result<(), ConfigError> {
    if let Some(device) = ini.get("cdrip", "device") {
        config.device = Some(PathBuf::from(device));
    }
    if let Some(format) = ini.get("cdrip", "format") {
        config.format = format.to_string();
    }
    if let Some(raw) = ini.get("cdrip", "compression") {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("auto") {
            config.compression_level = -1;
        } else {
            let level: i32 = raw.parse().map_err(|_| ConfigError::Invalid {
                key: "cdrip.compression".to_string(),
                message: format!("expected 0-8 or \"auto\", got \"{}\"", raw),
            })?;
            if !(0..=8).contains(&level) {
                return Err(ConfigError::Invalid {
                    key: "cdrip.compression".to_string(),
                    message: format!("level {} out of range", level),
                });
            }
            config.compression_level = level;
        }
    }
    if let Some(raw) = ini.get("cdrip", "mode") {
        config.mode = RipMode::parse(raw).ok_or_else(|| ConfigError::Invalid {
            key: "cdrip.mode".to_string(),
            message: format!("expected fast|best|default, got \"{}\"", raw),
        })?;
    }
    if let Some(raw) = ini.get("cdrip", "max_width") {
        let width: u32 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "cdrip.max_width".to_string(),
            message: format!("expected positive integer, got \"{}\"", raw),
        })?;
        if width == 0 {
            return Err(ConfigError::Invalid {
                key: "cdrip.max_width".to_string(),
                message: "width must be positive".to_string(),
            });
        }
        config.max_width = width;
    }
    if let Some(raw) = ini.get("cdrip", "repeat") {
        config.repeat = parse_bool(raw, "cdrip.repeat")?;
    }
    if let Some(raw) = ini.get("cdrip", "sort") {
        config.sort = parse_bool(raw, "cdrip.sort")?;
    }
    if let Some(raw) = ini.get("cdrip", "auto") {
        config.auto_mode = parse_bool(raw, "cdrip.auto")?;
    }
    if let Some(raw) = ini.get("cdrip", "speed") {
        config.speed_fast = match raw.trim().to_lowercase().as_str() {
            "slow" => false,
            "fast" => true,
            other => {
                return Err(ConfigError::Invalid {
                    key: "cdrip.speed".to_string(),
                    message: format!("expected slow|fast, got \"{}\"", other),
                })
            }
        };
    }
    if let Some(raw) = ini.get("cdrip", "discogs") {
        config.discogs = CoverArtPolicy::parse(raw).ok_or_else(|| ConfigError::Invalid {
            key: "cdrip.discogs".to_string(),
            message: format!("expected no|always|fallback, got \"{}\"", raw),
        })?;
    }
    if let Some(raw) = ini.get("cdrip", "aa") {
        config.allow_aa = parse_bool(raw, "cdrip.aa")?;
    }
    if let Some(raw) = ini.get("cdrip", "filter_title") {
        let regex = RegexBuilder::new(raw)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "cdrip.filter_title".to_string(),
                message: e.to_string(),
            })?;
        config.filter_title = Some(regex);
    }
    config.servers = parse_servers(ini)?;
    Ok(())
}

/// Load configuration. With an explicit path a missing or broken file
/// is an error; otherwise the search falls back to defaults.
pub fn load(path: Option<&Path>) -> Result<CdripConfig, ConfigError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = path {
        candidates.push(path.to_path_buf());
    } else {
        candidates.push(PathBuf::from("cdrip.conf"));
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".cdrip.conf"));
        }
    }

    let mut config = CdripConfig::default();
    for candidate in candidates {
        match std::fs::read_to_string(&candidate) {
            Ok(text) => {
                debug!("loading config from {}", candidate.display());
                let ini = IniView {
                    values: parse_ini(&text),
                };
                apply_ini(&mut config, &ini)?;
                config.config_path = Some(candidate);
                return Ok(config);
            }
            Err(e) => {
                if path.is_some() {
                    return Err(ConfigError::Io {
                        path: candidate.display().to_string(),
                        source: e,
                    });
                }
            }
        }
    }
    Ok(config)
}
