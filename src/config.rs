//! Configuration for the Telegram API credentials and the export target
//!
//! Loads `KEY=value` assignments from `members.env` (or the file named by
//! `TG_CONFIG`). Environment variables take precedence over file values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::export::ExportFormat;

/// Default constants (used when the key is absent)
pub const CONFIG_FILE: &str = "members.env";
pub const CONFIG_ENV: &str = "TG_CONFIG";
pub const SESSION_NAME: &str = "telegram_session";
pub const LOG_FILE: &str = "telegram_parser.log";
pub const FILE_PREFIX: &str = "telegram_members";
pub const MAX_PAGE_SIZE: i32 = 200;
pub const DEFAULT_MAX_MEMBERS: usize = 10_000;
pub const REQUEST_DELAY_MS: u64 = 500;
pub const PATTERN_DELAY_MS: u64 = 1000;

pub const KEY_API_ID: &str = "TG_API_ID";
pub const KEY_API_HASH: &str = "TG_API_HASH";
pub const KEY_PHONE: &str = "TG_PHONE_NUMBER";
pub const KEY_GROUP_LINK: &str = "TG_GROUP_LINK";

/// Every key the loader understands. Only these are read from the environment.
const KNOWN_KEYS: &[&str] = &[
    KEY_API_ID,
    KEY_API_HASH,
    KEY_PHONE,
    KEY_GROUP_LINK,
    "TG_PASSWORD",
    "TG_SESSION_NAME",
    "TG_OUTPUT_DIR",
    "TG_LOG_FILE",
    "TG_EXPORT_FORMAT",
    "TG_FILE_PREFIX",
    "TG_PAGE_SIZE",
    "TG_REQUEST_DELAY_MS",
    "TG_PATTERN_DELAY_MS",
    "TG_MAX_MEMBERS",
    "TG_SEARCH_PATTERNS",
];

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: String,
    pub password: Option<String>,
    /// Raw channel link as written in the config. Parsed by `ChannelLink::parse`.
    pub channel_link: String,
    pub session_name: String,
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    pub export_format: ExportFormat,
    pub file_prefix: String,
    pub page_size: i32,
    pub request_delay: Duration,
    pub pattern_delay: Duration,
    /// 0 means no limit
    pub max_members: usize,
    pub search_patterns: bool,
}

impl Config {
    /// Load configuration from `TG_CONFIG` or `members.env`.
    ///
    /// A missing default file is not an error: the environment alone may carry
    /// every key. A missing file named explicitly through `TG_CONFIG` is.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(path.trim()),
            _ if Path::new(CONFIG_FILE).exists() => Self::load_from_file(CONFIG_FILE),
            _ => Self::from_values(&Self::env_overrides(HashMap::new())),
        }
    }

    /// Load configuration from a specific key-value file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let values = Self::read_file(path.as_ref())?;
        Self::from_values(&Self::env_overrides(values))
    }

    fn read_file(path: &Path) -> Result<HashMap<String, String>> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut values = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                Error::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            values.insert(key, value);
        }
        Ok(values)
    }

    fn env_overrides(mut values: HashMap<String, String>) -> HashMap<String, String> {
        for key in KNOWN_KEYS {
            if let Ok(env_val) = std::env::var(key) {
                values.insert((*key).to_string(), env_val);
            }
        }
        values
    }

    /// Resolve a value: if it looks like ${VAR}, take VAR from the environment
    fn resolve(values: &HashMap<String, String>, key: &str) -> Option<String> {
        let value = values.get(key)?.trim().to_string();
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            return std::env::var(var_name).ok().map(|v| v.trim().to_string());
        }
        Some(value)
    }

    /// Template values copied from the example config count as unset.
    fn is_placeholder(value: &str) -> bool {
        let v = value.trim_start_matches('+');
        v.is_empty() || v.starts_with("YOUR_")
    }

    fn required(
        values: &HashMap<String, String>,
        key: &str,
        problems: &mut Vec<String>,
    ) -> String {
        match Self::resolve(values, key) {
            Some(v) if !Self::is_placeholder(&v) => v,
            _ => {
                problems.push(format!("{} is not set", key));
                String::new()
            }
        }
    }

    fn optional(values: &HashMap<String, String>, key: &str) -> Option<String> {
        Self::resolve(values, key).filter(|v| !v.is_empty())
    }

    fn parse_number<T: std::str::FromStr>(
        values: &HashMap<String, String>,
        key: &str,
        default: T,
        problems: &mut Vec<String>,
    ) -> T {
        match Self::optional(values, key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                problems.push(format!("{} must be a number, got '{}'", key, raw));
                default
            }),
        }
    }

    /// Build and validate configuration from already-merged values.
    ///
    /// Every missing or invalid field is reported at once.
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self> {
        let mut problems = Vec::new();

        let api_id_raw = Self::required(values, KEY_API_ID, &mut problems);
        let api_id = if api_id_raw.is_empty() {
            0
        } else {
            match api_id_raw.parse::<i32>() {
                Ok(id) if id > 0 => id,
                _ => {
                    problems.push(format!(
                        "{} must be a positive integer, got '{}'",
                        KEY_API_ID, api_id_raw
                    ));
                    0
                }
            }
        };

        let api_hash = Self::required(values, KEY_API_HASH, &mut problems);
        let phone = Self::required(values, KEY_PHONE, &mut problems);

        // An empty link is left for ChannelLink::parse to reject; only an
        // absent key is a configuration problem.
        let channel_link = match Self::resolve(values, KEY_GROUP_LINK) {
            Some(link) => link,
            None => {
                problems.push(format!("{} is not set", KEY_GROUP_LINK));
                String::new()
            }
        };

        let export_format = match Self::optional(values, "TG_EXPORT_FORMAT") {
            None => ExportFormat::default(),
            Some(raw) => raw.parse().unwrap_or_else(|e: Error| {
                problems.push(e.to_string());
                ExportFormat::default()
            }),
        };

        let page_size = Self::parse_number(values, "TG_PAGE_SIZE", MAX_PAGE_SIZE, &mut problems);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            problems.push(format!(
                "TG_PAGE_SIZE must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            ));
        }

        let request_delay =
            Self::parse_number(values, "TG_REQUEST_DELAY_MS", REQUEST_DELAY_MS, &mut problems);
        let pattern_delay =
            Self::parse_number(values, "TG_PATTERN_DELAY_MS", PATTERN_DELAY_MS, &mut problems);
        let max_members =
            Self::parse_number(values, "TG_MAX_MEMBERS", DEFAULT_MAX_MEMBERS, &mut problems);

        let search_patterns = match Self::optional(values, "TG_SEARCH_PATTERNS") {
            None => true,
            Some(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    problems.push(format!(
                        "TG_SEARCH_PATTERNS must be true or false, got '{}'",
                        raw
                    ));
                    true
                }
            },
        };

        if !problems.is_empty() {
            return Err(Error::Config(problems.join("; ")));
        }

        Ok(Self {
            api_id,
            api_hash,
            phone,
            password: Self::optional(values, "TG_PASSWORD"),
            channel_link,
            session_name: Self::optional(values, "TG_SESSION_NAME")
                .unwrap_or_else(|| SESSION_NAME.to_string()),
            output_dir: Self::optional(values, "TG_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            log_file: Self::optional(values, "TG_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(LOG_FILE)),
            export_format,
            file_prefix: Self::optional(values, "TG_FILE_PREFIX")
                .unwrap_or_else(|| FILE_PREFIX.to_string()),
            page_size,
            request_delay: Duration::from_millis(request_delay),
            pattern_delay: Duration::from_millis(pattern_delay),
            max_members,
            search_patterns,
        })
    }

    /// Session database path: `<session_name>.session`
    pub fn session_file(&self) -> String {
        format!("{}.session", self.session_name)
    }

    /// Lock file path: `<session_name>.lock`
    pub fn lock_file(&self) -> String {
        format!("{}.lock", self.session_name)
    }

    /// Phone number with the secret middle digits masked, for log lines.
    pub fn masked_phone(&self) -> String {
        let chars: Vec<char> = self.phone.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 5), tail)
    }
}
