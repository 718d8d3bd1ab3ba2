//! Data models for DVR autorec operations

use chrono::{FixedOffset, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::dvr::autorec::AutorecRule;

/// Minutes in a day; start window bounds live in `[0, MINUTES_PER_DAY)`
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Status of a scheduled recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Recording,
    Completed,
    Failed,
    Canceled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Recording => "recording",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Canceled => "canceled",
        }
    }

    /// Whether the recording has not yet been picked up by the recorder
    pub fn is_unstarted(&self) -> bool {
        matches!(self, ScheduleStatus::Scheduled)
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ScheduleStatus::Scheduled),
            "recording" => Ok(ScheduleStatus::Recording),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            "canceled" => Ok(ScheduleStatus::Canceled),
            _ => Err(format!("Unknown schedule status: {}", s)),
        }
    }
}

/// Recording priority, most important first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Important,
    High,
    #[default]
    Normal,
    Low,
    Unimportant,
}

impl Priority {
    pub fn as_u32(&self) -> u32 {
        match self {
            Priority::Important => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Unimportant => 4,
        }
    }

    /// Unknown values fall back to `Normal`
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Priority::Important,
            1 => Priority::High,
            3 => Priority::Low,
            4 => Priority::Unimportant,
            _ => Priority::Normal,
        }
    }
}

/// Weekday bitmask, bit0 = Monday .. bit6 = Sunday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Weekdays(u8);

const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

impl Weekdays {
    pub const ALL: Weekdays = Weekdays(0x7f);
    pub const NONE: Weekdays = Weekdays(0);

    pub fn from_bits(bits: u8) -> Self {
        Weekdays(bits & 0x7f)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_all(&self) -> bool {
        self.0 == 0x7f
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether the day `0 = Monday .. 6 = Sunday` is set
    pub fn contains_day(&self, days_from_monday: u32) -> bool {
        days_from_monday < 7 && self.0 & (1 << days_from_monday) != 0
    }

    /// Build a mask from day numbers `1 = Monday .. 7 = Sunday`.
    ///
    /// Out-of-range numbers are ignored.
    pub fn from_day_numbers(days: &[u32]) -> Self {
        let bits = days
            .iter()
            .filter(|d| (1..8).contains(*d))
            .fold(0u8, |acc, d| acc | (1 << (d - 1)));
        Weekdays(bits)
    }

    pub fn day_numbers(&self) -> Vec<u32> {
        (0..7u32).filter(|i| self.0 & (1 << i) != 0).map(|i| i + 1).collect()
    }

    /// Human readable form, e.g. "All days" or "Mon,Wed,Fri"
    pub fn render(&self) -> String {
        if self.is_all() {
            return "All days".to_string();
        }
        if self.is_empty() {
            return "No days".to_string();
        }
        self.day_numbers()
            .iter()
            .map(|d| WEEKDAY_NAMES[(*d - 1) as usize])
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for Weekdays {
    fn default() -> Self {
        Weekdays::ALL
    }
}

/// Parse a minute-of-day value.
///
/// Accepts "HH:MM" or a bare number of minutes. Anything empty, not starting
/// with a digit, or at/after midnight is "unset".
pub fn parse_time_of_day(value: &str) -> Option<u16> {
    let value = value.trim();
    if !value.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let minutes = match value.split_once(':') {
        Some((hours, mins)) => leading_number(hours) * 60 + leading_number(mins),
        None => leading_number(value),
    };

    if minutes >= MINUTES_PER_DAY as u32 {
        None
    } else {
        Some(minutes as u16)
    }
}

fn leading_number(s: &str) -> u32 {
    s.chars()
        .take_while(|c| c.is_ascii_digit())
        .fold(0u32, |acc, c| {
            acc.saturating_mul(10)
                .saturating_add(c.to_digit(10).unwrap_or(0))
        })
}

pub fn format_time_of_day(minutes: Option<u16>) -> String {
    match minutes {
        Some(m) => format!("{:02}:{:02}", m / 60, m % 60),
        None => "Any".to_string(),
    }
}

/// Selectable start times, every 10 minutes, preceded by `unset_label`
pub fn time_of_day_options(unset_label: &str) -> Vec<String> {
    std::iter::once(unset_label.to_string())
        .chain((0..MINUTES_PER_DAY).step_by(10).map(|m| format_time_of_day(Some(m))))
        .collect()
}

/// Time zone used to derive an event's local start time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Zone {
    /// The system's local time zone
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl Zone {
    pub fn from_offset_minutes(minutes: Option<i32>) -> Self {
        match minutes.and_then(|m| FixedOffset::east_opt(m * 60)) {
            Some(offset) => Zone::Fixed(offset),
            None => Zone::Local,
        }
    }

    pub fn local_datetime(&self, timestamp: i64) -> Option<NaiveDateTime> {
        match self {
            Zone::Local => Local
                .timestamp_opt(timestamp, 0)
                .earliest()
                .map(|dt| dt.naive_local()),
            Zone::Fixed(offset) => offset
                .timestamp_opt(timestamp, 0)
                .single()
                .map(|dt| dt.naive_local()),
        }
    }
}

/// A scheduled recording created for an autorec match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    /// Owning autorec rule; cleared once the schedule is detached
    pub autorec_id: Option<String>,
    pub event_id: i64,
    pub channel_id: String,
    pub program_title: String,
    pub scheduled_start: i64, // Unix timestamp
    pub scheduled_end: i64,   // Unix timestamp
    pub start_padding_sec: i32,
    pub end_padding_sec: i32,
    pub priority: Priority,
    pub retention_days: i32,
    pub directory: Option<String>,
    pub status: ScheduleStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
}

impl Schedule {
    /// Calculate the actual start time accounting for padding
    pub fn actual_start(&self) -> i64 {
        self.scheduled_start - self.start_padding_sec as i64
    }
}

/// Request to schedule a new recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub autorec_id: Option<String>,
    pub event_id: i64,
    pub channel_id: String,
    pub program_title: String,
    pub scheduled_start: i64,
    pub scheduled_end: i64,
    #[serde(default = "default_start_padding")]
    pub start_padding_sec: i32,
    #[serde(default = "default_end_padding")]
    pub end_padding_sec: i32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retention_days: i32,
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_start_padding() -> i32 {
    60
}
fn default_end_padding() -> i32 {
    300
}

/// Settings for autorec operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutorecSettings {
    pub default_start_padding_sec: i32,
    pub default_end_padding_sec: i32,
    /// Offset from UTC used for start window and weekday checks; `None` uses system local time
    pub utc_offset_minutes: Option<i32>,
    pub debug_logging: bool,
}

impl AutorecSettings {
    pub fn zone(&self) -> Zone {
        Zone::from_offset_minutes(self.utc_offset_minutes)
    }
}

impl Default for AutorecSettings {
    fn default() -> Self {
        Self {
            default_start_padding_sec: default_start_padding(),
            default_end_padding_sec: default_end_padding(),
            utc_offset_minutes: None,
            debug_logging: false,
        }
    }
}

/// Persisted (and patch) shape of an autorec rule.
///
/// Every field is optional so the same record can carry a full rule or a
/// partial edit; absent fields are left untouched when applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutorecRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_extra: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_extra: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekdays: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minduration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxduration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pri: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serieslink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Event sent to clients when an autorec rule is added/updated/removed
#[derive(Debug, Clone, Serialize)]
pub struct AutorecEvent {
    pub event_type: String, // "added", "updated", "removed"
    pub autorec_id: String,
    pub title: String,
    pub enabled: bool,
}

impl AutorecEvent {
    pub fn added(rule: &AutorecRule) -> Self {
        Self::with_type("added", rule)
    }

    pub fn updated(rule: &AutorecRule) -> Self {
        Self::with_type("updated", rule)
    }

    pub fn removed(rule: &AutorecRule) -> Self {
        Self::with_type("removed", rule)
    }

    fn with_type(event_type: &str, rule: &AutorecRule) -> Self {
        Self {
            event_type: event_type.to_string(),
            autorec_id: rule.id.to_string(),
            title: rule.display_title().to_string(),
            enabled: rule.enabled,
        }
    }
}
