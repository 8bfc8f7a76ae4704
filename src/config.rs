use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use log::error;

pub const DEFAULT_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_READ_CHUNK: usize = 4096;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub source: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub oversize: Option<String>,
    #[serde(default = "default_true")]
    pub emit_trailing: bool,
    #[serde(default)]
    pub idle_flush_ms: u64,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            delimiter: default_delimiter(),
            oversize: None,
            emit_trailing: true,
            idle_flush_ms: 0,
            read_chunk: default_read_chunk(),
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_delimiter() -> String {
    "\n".to_string()
}

fn default_true() -> bool {
    true
}

fn default_read_chunk() -> usize {
    DEFAULT_READ_CHUNK
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Stdin,
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

/// What to do when the buffer fills up without a delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OversizePolicy {
    /// Hand out the whole buffer as a partial frame.
    Flush,
    /// Stop with `Error::FrameTooLarge`.
    Error,
}

#[derive(Debug, Clone)]
pub struct FlattenedConfig {
    pub capacity: usize,
    pub delimiter: Vec<u8>,
    pub oversize: OversizePolicy,
    pub emit_trailing: bool,
    pub idle_flush_ms: u64,
    pub read_chunk: usize,
    pub sources: Vec<SourceConfig>,
}

impl Default for FlattenedConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            delimiter: b"\n".to_vec(),
            oversize: OversizePolicy::Flush,
            emit_trailing: true,
            idle_flush_ms: 0,
            read_chunk: DEFAULT_READ_CHUNK,
            sources: Vec::new(),
        }
    }
}

pub fn load_config(path: &str) -> Result<FlattenedConfig, Box<dyn std::error::Error>> {

    if !Path::new(path).exists() {
        return Err(format!("Config file not found: {}", path).into());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

    let cfg = parse_config(&content)
        .map_err(|e| format!("Failed to parse TOML config {}: {}", path, e))?;

    log::info!("Config loaded from: {}", path);
    Ok(cfg)
}

pub fn parse_config(content: &str) -> Result<FlattenedConfig, Box<dyn std::error::Error>> {
    let cfg: Config = toml::from_str(content)?;

    log::info!("Found {} total sources in config", cfg.source.len());

    let delimiter = parse_delimiter(&cfg.stream.delimiter)?;
    let oversize = match cfg.stream.oversize.as_deref() {
        None => OversizePolicy::Flush,
        Some(s) => parse_oversize(s)?,
    };
    if cfg.stream.read_chunk == 0 {
        return Err("read_chunk must be at least 1".into());
    }

    let mut sources = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    for s in cfg.source.into_iter().filter(|s| s.enabled) {
        if !is_valid_id(&s.id) {
            error!("Invalid source id '{}'. Use [a-z0-9][a-z0-9_-]*", s.id);
            continue;
        }
        if s.kind == SourceKind::File && s.path.is_none() {
            error!("File source '{}' has no path - skipping", s.id);
            continue;
        }
        if !seen_ids.insert(s.id.clone()) {
            error!("Duplicate source id '{}' - skipping", s.id);
            continue;
        }
        sources.push(s);
    }

    log::info!("Enabled sources: {}", sources.len());
    if sources.is_empty() {
        log::warn!("No enabled sources found in config - falling back to stdin");
    }

    Ok(FlattenedConfig {
        capacity: cfg.stream.capacity,
        delimiter,
        oversize,
        emit_trailing: cfg.stream.emit_trailing,
        idle_flush_ms: cfg.stream.idle_flush_ms,
        read_chunk: cfg.stream.read_chunk,
        sources,
    })
}

pub fn parse_oversize(s: &str) -> Result<OversizePolicy, String> {
    if s.eq_ignore_ascii_case("flush") {
        Ok(OversizePolicy::Flush)
    } else if s.eq_ignore_ascii_case("error") {
        Ok(OversizePolicy::Error)
    } else {
        Err(format!("Unknown oversize policy '{}'. Use flush or error", s))
    }
}

/// Turns a delimiter spec such as `\r\n` or `\x00` into raw bytes.
pub fn parse_delimiter(s: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'0') => out.push(0),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hi = bytes.next().and_then(hex_value);
                let lo = bytes.next().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => return Err(format!("Bad \\x escape in delimiter '{}'", s)),
                }
            }
            _ => return Err(format!("Bad escape in delimiter '{}'", s)),
        }
    }
    if out.is_empty() {
        return Err("Delimiter must not be empty".to_string());
    }
    Ok(out)
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn is_valid_id(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_lc_alnum(c) => {},
        _ => return false,
    }
    for c in chars {
        if !(is_lc_alnum(c) || c == '-' || c == '_') { return false; }
    }
    true
}

fn is_lc_alnum(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9')
}
