use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::Serialize;

use crate::entity::FacilityId;
use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Parse a human-readable duration string into a [`Duration`].
///
/// Supports components: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs` (seconds).
/// Components can be combined: "2h30m", "1d12h", "90s". A bare number is seconds.
/// Returns `None` if the string is empty, unparseable or overflows.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit_secs = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit_secs)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        if found_unit {
            // "30m15" is ambiguous.
            return None;
        }
        total_secs = total_secs.checked_add(num_buf.parse::<u64>().ok()?)?;
    }

    Some(Duration::from_secs(total_secs))
}

/// Source of raw setting values, keyed by variable name.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn opt(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn or(lookup: Lookup<'_>, key: &str, default: &str) -> String {
    opt(lookup, key).unwrap_or_else(|| default.to_string())
}

fn duration(
    lookup: Lookup<'_>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match opt(lookup, key) {
        None => Ok(default),
        Some(raw) => parse_duration(&raw).ok_or_else(|| ConfigError::Invalid {
            key,
            reason: format!("'{raw}' is not a duration"),
        }),
    }
}

fn number<T: FromStr>(lookup: Lookup<'_>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match opt(lookup, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("'{raw}' is not a number"),
        }),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub schedule: ScheduleConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub telegram: TelegramConfig,
    /// How long units get to exit on their own after cancellation.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            upstream: UpstreamConfig::from_lookup(lookup)?,
            schedule: ScheduleConfig::from_lookup(lookup)?,
            pipeline: PipelineConfig::from_lookup(lookup)?,
            storage: StorageConfig::from_lookup(lookup),
            telegram: TelegramConfig::from_lookup(lookup)?,
            shutdown_grace: duration(lookup, "VACCIBOT_SHUTDOWN_GRACE", Duration::from_secs(10))?,
        })
    }

    /// Reject configurations the pipeline cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.is_none() {
            return Err(ConfigError::Missing("VACCIBOT_TELEGRAM_TOKEN"));
        }
        if self.telegram.chat_id.is_none() {
            return Err(ConfigError::Missing("VACCIBOT_TELEGRAM_CHAT"));
        }
        if self.upstream.requests_per_second == 0 {
            return Err(ConfigError::Invalid {
                key: "VACCIBOT_RPS",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.schedule.check_every.is_zero() {
            return Err(ConfigError::Invalid {
                key: "VACCIBOT_CHECK_EVERY",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.telegram.send_timeout.is_zero() || self.telegram.send_timeout >= self.shutdown_grace {
            return Err(ConfigError::Invalid {
                key: "VACCIBOT_TELEGRAM_TIMEOUT",
                reason: "must be greater than 0 and shorter than VACCIBOT_SHUTDOWN_GRACE".to_string(),
            });
        }
        if self.pipeline.facility_workers == 0 || self.pipeline.slot_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "VACCIBOT_FACILITY_WORKERS",
                reason: "worker counts must be greater than 0".to_string(),
            });
        }
        if let Err(e) = regex::RegexBuilder::new(&self.pipeline.keywords).build() {
            return Err(ConfigError::Invalid {
                key: "VACCIBOT_KEYWORDS",
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  upstream:  url={}, rps={}, timeout={:?}",
            self.upstream.base_url,
            self.upstream.requests_per_second,
            self.upstream.request_timeout
        );
        tracing::info!(
            "  schedule:  check_every={:?}, send_every={:?}, policy={}",
            self.schedule.check_every,
            self.schedule.send_every,
            self.schedule.resend_policy
        );
        tracing::info!(
            "  pipeline:  facility_workers={}, slot_workers={}, blocklist={:?}, keywords={}",
            self.pipeline.facility_workers,
            self.pipeline.slot_workers,
            self.pipeline.blocklist,
            self.pipeline.keywords
        );
        tracing::info!("  storage:   db={}", self.storage.db_path.display());
        tracing::info!(
            "  telegram:  chat={}, token={}, timeout={:?}, quiet_hours={}",
            self.telegram.chat_id.as_deref().unwrap_or("(none)"),
            if self.telegram.bot_token.is_some() { "(set)" } else { "(none)" },
            self.telegram.send_timeout,
            self.telegram
                .quiet_hours
                .map(|w| w.to_string())
                .unwrap_or_else(|| "off".to_string())
        );
    }
}

// ── Upstream ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub requests_per_second: u32,
    pub request_timeout: Duration,
}

impl UpstreamConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: or(lookup, "VACCIBOT_API_URL", "https://gorzdrav.spb.ru/_api/api"),
            requests_per_second: number(lookup, "VACCIBOT_RPS", 2)?,
            request_timeout: duration(lookup, "VACCIBOT_REQUEST_TIMEOUT", Duration::from_secs(30))?,
        })
    }
}

// ── Schedule ──────────────────────────────────────────────────

/// How a known slot qualifies for a repeat alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResendPolicy {
    /// Cooldown must have elapsed AND the counters must differ.
    #[default]
    CooldownAndChange,
    /// Any counter change triggers an alert, cooldown is ignored.
    ChangeOnly,
}

impl FromStr for ResendPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cooldown_and_change" => Ok(Self::CooldownAndChange),
            "change_only" => Ok(Self::ChangeOnly),
            other => Err(format!("unknown resend policy '{other}'")),
        }
    }
}

impl std::fmt::Display for ResendPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResendPolicy::CooldownAndChange => write!(f, "cooldown_and_change"),
            ResendPolicy::ChangeOnly => write!(f, "change_only"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleConfig {
    pub check_every: Duration,
    /// Minimum interval between two alerts for the same slot.
    pub send_every: Duration,
    pub resend_policy: ResendPolicy,
}

impl ScheduleConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let resend_policy = match opt(lookup, "VACCIBOT_RESEND_POLICY") {
            None => ResendPolicy::default(),
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "VACCIBOT_RESEND_POLICY",
                reason,
            })?,
        };
        Ok(Self {
            check_every: duration(lookup, "VACCIBOT_CHECK_EVERY", Duration::from_secs(10 * 60))?,
            send_every: duration(lookup, "VACCIBOT_SEND_EVERY", Duration::from_secs(30 * 60))?,
            resend_policy,
        })
    }
}

// ── Pipeline ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Concurrent region→facility expanders.
    pub facility_workers: usize,
    /// Concurrent facility→slot expanders.
    pub slot_workers: usize,
    /// Facilities never queried regardless of upstream flags.
    pub blocklist: BTreeSet<FacilityId>,
    /// Case-insensitive pattern a slot name must match.
    pub keywords: String,
    /// Base URL of the public booking page used for deep links.
    pub link_base: String,
}

impl PipelineConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let blocklist = or(lookup, "VACCIBOT_BLOCKLIST", "182,319")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<FacilityId>().map_err(|_| ConfigError::Invalid {
                    key: "VACCIBOT_BLOCKLIST",
                    reason: format!("'{s}' is not a facility id"),
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            facility_workers: number(lookup, "VACCIBOT_FACILITY_WORKERS", 1)?,
            slot_workers: number(lookup, "VACCIBOT_SLOT_WORKERS", 1)?,
            blocklist,
            keywords: or(lookup, "VACCIBOT_KEYWORDS", "covid|ковид|вакцин"),
            link_base: or(
                lookup,
                "VACCIBOT_LINK_BASE",
                "https://gorzdrav.spb.ru/service-covid-vaccination-schedule",
            ),
        })
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl StorageConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            db_path: PathBuf::from(or(lookup, "VACCIBOT_DB", "/tmp/vaccibot/dedup.sqlite")),
        }
    }
}

// ── Telegram ──────────────────────────────────────────────────

/// Local-time window during which alerts are delivered silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuietWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl FromStr for QuietWindow {
    type Err = String;

    /// Parses `HH:MM-HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("'{s}' is not of the form HH:MM-HH:MM"))?;
        let parse = |t: &str| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M").map_err(|e| format!("'{t}': {e}"))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }
}

impl std::fmt::Display for QuietWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelegramConfig {
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub quiet_hours: Option<QuietWindow>,
    /// Offset of local time from UTC, in hours, used for quiet hours.
    pub utc_offset_hours: i32,
    /// Deadline for a single Bot API call.
    pub send_timeout: Duration,
}

impl TelegramConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let quiet_hours = match opt(lookup, "VACCIBOT_QUIET_HOURS") {
            None => None,
            Some(raw) => Some(raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "VACCIBOT_QUIET_HOURS",
                reason,
            })?),
        };
        let utc_offset_hours = number(lookup, "VACCIBOT_UTC_OFFSET_HOURS", 3)?;
        if !(-23..=23).contains(&utc_offset_hours) {
            return Err(ConfigError::Invalid {
                key: "VACCIBOT_UTC_OFFSET_HOURS",
                reason: format!("{utc_offset_hours} is out of range"),
            });
        }
        Ok(Self {
            bot_token: opt(lookup, "VACCIBOT_TELEGRAM_TOKEN"),
            chat_id: opt(lookup, "VACCIBOT_TELEGRAM_CHAT"),
            quiet_hours,
            utc_offset_hours,
            send_timeout: duration(lookup, "VACCIBOT_TELEGRAM_TIMEOUT", Duration::from_secs(5))?,
        })
    }
}
