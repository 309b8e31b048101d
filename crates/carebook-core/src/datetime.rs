use std::fs;
use std::path::PathBuf;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Offset,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "carebook-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "CAREBOOK_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "CAREBOOK_TIME_CONFIG";
const DEFAULT_VIEWER_TIMEZONE: &str =
  "UTC";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Converts between UTC storage instants and the viewer's wall clock.
///
/// Weekday membership, "today" checks and day/week/month boundaries are
/// computed on the local representation and converted back to UTC only
/// when a query window or stored value is produced.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Normalizer {
  tz: Tz
}

impl Default for Normalizer {
  fn default() -> Self {
    Self::utc()
  }
}

impl Normalizer {
  #[must_use]
  pub fn new(tz: Tz) -> Self {
    Self { tz }
  }

  #[must_use]
  pub fn utc() -> Self {
    Self {
      tz: chrono_tz::UTC
    }
  }

  #[must_use]
  pub fn timezone(&self) -> Tz {
    self.tz
  }

  #[must_use]
  pub fn to_local(
    &self,
    utc: DateTime<Utc>
  ) -> DateTime<Tz> {
    utc.with_timezone(&self.tz)
  }

  #[must_use]
  pub fn to_utc(
    &self,
    local: &DateTime<Tz>
  ) -> DateTime<Utc> {
    local.with_timezone(&Utc)
  }

  #[must_use]
  pub fn local_date(
    &self,
    utc: DateTime<Utc>
  ) -> NaiveDate {
    self.to_local(utc).date_naive()
  }

  /// Wall-clock time to UTC. A repeated hour resolves to the earlier
  /// instant; a skipped hour is pushed forward by the length of the gap.
  #[must_use]
  pub fn local_to_utc(
    &self,
    local_naive: NaiveDateTime
  ) -> DateTime<Utc> {
    match self
      .tz
      .from_local_datetime(&local_naive)
    {
      | LocalResult::Single(local_dt) => {
        local_dt.with_timezone(&Utc)
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        let chosen = if first <= second {
          first
        } else {
          second
        };
        chosen.with_timezone(&Utc)
      }
      | LocalResult::None => {
        // Offset in force a day earlier,
        // i.e. before the transition.
        let before_gap = self
          .tz
          .offset_from_utc_datetime(
            &(local_naive
              - Duration::days(1))
          )
          .fix()
          .local_minus_utc();
        tracing::debug!(
          timezone = %self.tz,
          local = %local_naive,
          "local time falls in a DST gap; shifting forward"
        );
        DateTime::<Utc>::from_naive_utc_and_offset(
          local_naive
            - Duration::seconds(
              i64::from(before_gap)
            ),
          Utc
        )
      }
    }
  }

  /// Like [`Normalizer::local_to_utc`] but rejects wall-clock times that
  /// do not exist in this timezone.
  pub fn local_to_utc_strict(
    &self,
    local_naive: NaiveDateTime,
    context: &str
  ) -> anyhow::Result<DateTime<Utc>> {
    match self
      .tz
      .from_local_datetime(&local_naive)
    {
      | LocalResult::None => {
        Err(anyhow!(
          "local datetime does not \
           exist in {}: {context}",
          self.tz
        ))
      }
      | LocalResult::Ambiguous(..) => {
        tracing::warn!(
          context,
          local = %local_naive,
          "ambiguous local datetime; using earliest"
        );
        Ok(self.local_to_utc(local_naive))
      }
      | LocalResult::Single(_) => {
        Ok(self.local_to_utc(local_naive))
      }
    }
  }

  #[must_use]
  pub fn local_midnight(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    self.local_to_utc(
      date.and_time(NaiveTime::MIN)
    )
  }

  #[must_use]
  pub fn is_same_local_day(
    &self,
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>
  ) -> bool {
    match (a, b) {
      | (Some(a), Some(b)) => {
        self.local_date(a)
          == self.local_date(b)
      }
      | _ => false
    }
  }

  /// Same-day check for unvalidated text; missing or unparseable input is
  /// never the same day as anything.
  #[must_use]
  pub fn is_same_local_day_raw(
    &self,
    a: Option<&str>,
    b: Option<&str>
  ) -> bool {
    self.is_same_local_day(
      a.and_then(parse_instant),
      b.and_then(parse_instant)
    )
  }

  #[must_use]
  pub fn is_today(
    &self,
    utc: DateTime<Utc>,
    now: DateTime<Utc>
  ) -> bool {
    self.local_date(utc)
      == self.local_date(now)
  }
}

/// Resolves the viewer timezone: explicit id, then `CAREBOOK_TIMEZONE`,
/// then `carebook-time.toml`, then UTC.
#[tracing::instrument]
pub fn resolve_viewer_timezone(
  explicit: Option<&str>
) -> Tz {
  if let Some(raw) = explicit
    && let Some(tz) =
      parse_timezone(raw, "explicit")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_VIEWER_TIMEZONE,
    "DEFAULT_VIEWER_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "resolved viewer timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Parses a stored instant: RFC 3339 or `YYYYMMDDTHHMMSSZ`.
#[must_use]
pub fn parse_instant(
  raw: &str
) -> Option<DateTime<Utc>> {
  let token = raw.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  NaiveDateTime::parse_from_str(
    token,
    "%Y%m%dT%H%M%SZ"
  )
  .ok()
  .map(|naive| {
    DateTime::<Utc>::from_naive_utc_and_offset(
      naive, Utc
    )
  })
}

/// Parses a calendar anchor or a user-entered timestamp relative to `now`
/// in the viewer's timezone.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_anchor_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Normalizer
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return Ok(tz.local_midnight(
        tz.local_date(now)
      ));
    }
    | "tomorrow" => {
      return Ok(tz.local_midnight(
        add_days(tz.local_date(now), 1)
      ));
    }
    | "yesterday" => {
      return Ok(tz.local_midnight(
        add_days(tz.local_date(now), -1)
      ));
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let target_date = next_weekday_date(
      tz.local_date(now),
      target_weekday
    );
    return Ok(
      tz.local_midnight(target_date)
    );
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwh])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => Duration::days(num),
      | "w" => Duration::weeks(num),
      | "h" => Duration::hours(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };

    return Ok(
      if sign == "-" {
        now - duration
      } else {
        now + duration
      }
    );
  }

  if let Some(instant) =
    parse_instant(token)
  {
    return Ok(instant);
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(tz.local_midnight(date));
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return tz
        .local_to_utc_strict(ndt, fmt);
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nd/-Nw/+Nh, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM, YYYYMMDDTHHMMSSZ"
  })
}

pub(crate) fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Timelike,
    Utc
  };

  use super::{
    Normalizer,
    parse_anchor_expr,
    parse_instant,
    resolve_viewer_timezone
  };

  fn new_york() -> Normalizer {
    Normalizer::new(
      chrono_tz::America::New_York
    )
  }

  #[test]
  fn round_trips_through_local_time() {
    let tz = new_york();
    let samples = [
      Utc
        .with_ymd_and_hms(
          2024, 1, 15, 3, 30, 0
        )
        .single()
        .expect("valid instant"),
      Utc
        .with_ymd_and_hms(
          2024, 3, 10, 7, 0, 0
        )
        .single()
        .expect("valid instant"),
      Utc
        .with_ymd_and_hms(
          2024, 11, 3, 5, 30, 0
        )
        .single()
        .expect("valid instant"),
    ];

    for utc in samples {
      let local = tz.to_local(utc);
      assert_eq!(tz.to_utc(&local), utc);
    }
  }

  #[test]
  fn naive_round_trip_outside_transitions(
  ) {
    let tz = new_york();
    let utc = Utc
      .with_ymd_and_hms(
        2024, 6, 1, 13, 45, 0
      )
      .single()
      .expect("valid instant");
    let naive =
      tz.to_local(utc).naive_local();
    assert_eq!(
      tz.local_to_utc(naive),
      utc
    );
  }

  #[test]
  fn same_day_uses_local_calendar() {
    let tz = new_york();
    // 03:00Z on Jan 9 is still Jan 8 in New York.
    let late_evening = Utc
      .with_ymd_and_hms(
        2024, 1, 9, 3, 0, 0
      )
      .single()
      .expect("valid instant");
    let morning = Utc
      .with_ymd_and_hms(
        2024, 1, 8, 14, 0, 0
      )
      .single()
      .expect("valid instant");

    assert!(tz.is_same_local_day(
      Some(late_evening),
      Some(morning)
    ));
    assert!(!Normalizer::utc()
      .is_same_local_day(
        Some(late_evening),
        Some(morning)
      ));
  }

  #[test]
  fn same_day_rejects_missing_or_garbage(
  ) {
    let tz = new_york();
    let now = Utc::now();
    assert!(
      !tz.is_same_local_day(None, Some(now))
    );
    assert!(!tz.is_same_local_day(None, None));
    assert!(!tz.is_same_local_day_raw(
      Some("not a date"),
      Some("2024-01-08T10:00:00Z")
    ));
    assert!(tz.is_same_local_day_raw(
      Some("2024-01-08T10:00:00Z"),
      Some("20240108T200000Z")
    ));
  }

  #[test]
  fn gap_time_shifts_forward() {
    let tz = new_york();
    let gap = NaiveDate::from_ymd_opt(
      2024, 3, 10
    )
    .expect("valid date")
    .and_hms_opt(2, 30, 0)
    .expect("valid time");

    let utc = tz.local_to_utc(gap);
    let local = tz.to_local(utc);
    assert_eq!(local.hour(), 3);
    assert_eq!(local.minute(), 30);
    assert!(
      tz.local_to_utc_strict(gap, "test")
        .is_err()
    );
  }

  #[test]
  fn gap_east_of_utc_shifts_forward() {
    let tz = Normalizer::new(
      chrono_tz::Europe::Paris
    );
    let gap = NaiveDate::from_ymd_opt(
      2024, 3, 31
    )
    .expect("valid date")
    .and_hms_opt(2, 30, 0)
    .expect("valid time");

    // 03:30 CEST.
    assert_eq!(
      tz.local_to_utc(gap),
      Utc
        .with_ymd_and_hms(
          2024, 3, 31, 1, 30, 0
        )
        .single()
        .expect("valid instant")
    );
  }

  #[test]
  fn fold_time_picks_earliest() {
    let tz = new_york();
    let fold = NaiveDate::from_ymd_opt(
      2024, 11, 3
    )
    .expect("valid date")
    .and_hms_opt(1, 30, 0)
    .expect("valid time");

    assert_eq!(
      tz.local_to_utc(fold),
      Utc
        .with_ymd_and_hms(
          2024, 11, 3, 5, 30, 0
        )
        .single()
        .expect("valid instant")
    );
  }

  #[test]
  fn parses_anchor_weekday_and_date() {
    let tz = new_york();
    let now = Utc
      .with_ymd_and_hms(
        2024, 3, 14, 12, 0, 0
      )
      .single()
      .expect("valid now");

    let friday =
      parse_anchor_expr("friday", now, &tz)
        .expect("parse weekday");
    assert_eq!(
      tz.local_date(friday),
      NaiveDate::from_ymd_opt(2024, 3, 15)
        .expect("valid date")
    );

    let date = parse_anchor_expr(
      "2024-03-11",
      now,
      &tz
    )
    .expect("parse date");
    assert_eq!(
      date,
      Utc
        .with_ymd_and_hms(
          2024, 3, 11, 4, 0, 0
        )
        .single()
        .expect("valid instant")
    );

    let later =
      parse_anchor_expr("+2w", now, &tz)
        .expect("parse relative");
    assert_eq!(
      (later - now).num_days(),
      14
    );
    assert!(
      parse_anchor_expr("soonish", now, &tz)
        .is_err()
    );
  }

  #[test]
  fn parse_instant_handles_both_formats() {
    assert_eq!(
      parse_instant("20240101T090000Z"),
      parse_instant("2024-01-01T09:00:00Z")
    );
    assert!(parse_instant("").is_none());
  }

  #[test]
  fn explicit_timezone_wins() {
    assert_eq!(
      resolve_viewer_timezone(Some(
        " Asia/Tokyo "
      )),
      chrono_tz::Asia::Tokyo
    );
  }

  #[test]
  fn today_follows_viewer_calendar() {
    let tz = Normalizer::new(
      chrono_tz::Asia::Tokyo
    );
    // 23:30Z on the 7th is already the
    // 8th in Tokyo.
    let now = Utc
      .with_ymd_and_hms(
        2024, 1, 7, 23, 30, 0
      )
      .single()
      .expect("valid now");
    let morning = Utc
      .with_ymd_and_hms(
        2024, 1, 8, 1, 0, 0
      )
      .single()
      .expect("valid instant");
    assert!(tz.is_today(morning, now));
    assert!(
      !Normalizer::utc()
        .is_today(morning, now)
    );
  }
}
