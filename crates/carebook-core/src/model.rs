use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingRule {
    #[default]
    Continuous,
    OnTheHour,
    OnTheHalfHour,
}

impl SchedulingRule {
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "continuous" => Some(Self::Continuous),
            "hour" | "on_the_hour" => Some(Self::OnTheHour),
            "half-hour" | "half_hour" | "on_the_half_hour" => Some(Self::OnTheHalfHour),
            _ => None,
        }
    }

    /// Minute alignment of slot starts in local time; `None` for back-to-back slots.
    pub fn alignment_minutes(self) -> Option<u32> {
        match self {
            Self::Continuous => None,
            Self::OnTheHour => Some(60),
            Self::OnTheHalfHour => Some(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleOwner {
    Provider {
        provider_id: String,
    },
    Organization {
        organization_id: String,
        location_id: String,
    },
}

impl fmt::Display for RuleOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider { provider_id } => write!(f, "provider:{provider_id}"),
            Self::Organization {
                organization_id,
                location_id,
            } => write!(f, "org:{organization_id}@{location_id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceOffering {
    pub service_id: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub price_cents: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleIssue {
    InvertedWindow,
    MissingRecurringDays,
    EndsBeforeStart,
}

impl fmt::Display for RuleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvertedWindow => "start_time is not before end_time",
            Self::MissingRecurringDays => "recurring rule has no valid recurring_days",
            Self::EndsBeforeStart => "recurrence_end_date precedes start_time",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityRule {
    pub id: String,

    pub owner: RuleOwner,

    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    #[serde(default)]
    pub is_recurring: bool,

    /// Weekday numbers, 0 = Sunday through 6 = Saturday.
    #[serde(default)]
    pub recurring_days: Vec<u8>,

    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub scheduling_rule: SchedulingRule,

    #[serde(default)]
    pub available_services: Vec<ServiceOffering>,
}

impl AvailabilityRule {
    /// Valid weekdays from `recurring_days`; out-of-range numbers are ignored.
    pub fn active_weekdays(&self) -> BTreeSet<u8> {
        self.recurring_days
            .iter()
            .copied()
            .filter(|day| *day <= 6)
            .collect()
    }

    pub fn integrity_issue(&self) -> Option<RuleIssue> {
        if self.start_time >= self.end_time {
            return Some(RuleIssue::InvertedWindow);
        }
        if self.is_recurring && self.active_weekdays().is_empty() {
            return Some(RuleIssue::MissingRecurringDays);
        }
        if let Some(end) = self.recurrence_end_date
            && end < self.start_time
        {
            return Some(RuleIssue::EndsBeforeStart);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Booked,
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "booked" => Some(Self::Booked),
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            "no_show" | "no-show" | "noshow" => Some(Self::NoShow),
            _ => None,
        }
    }

    pub fn occupies_slot(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: Uuid,

    #[serde(default)]
    pub rule_id: Option<String>,

    #[serde(default)]
    pub slot_id: Option<String>,

    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    pub status: BookingStatus,

    #[serde(default)]
    pub price_cents: u32,

    pub client_id: String,
}

impl Booking {
    pub fn new_for_rule(
        rule_id: &str,
        client_id: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: Some(rule_id.to_string()),
            slot_id: None,
            start_time,
            end_time,
            status: BookingStatus::Booked,
            price_cents: 0,
            client_id,
        }
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// One concrete, date-bound instance of an availability rule.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Occurrence {
    pub id: String,
    pub rule_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub bookings: Vec<Booking>,
}

/// Half-open `[from, to)` query window in UTC.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ViewRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl ViewRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedInterval {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BlockedInterval {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Available,
    Booked,
    Blocked,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CalculatedSlot {
    pub id: String,
    pub rule_id: String,
    pub occurrence_id: String,
    pub service_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price_cents: u32,
    pub status: SlotStatus,
}
