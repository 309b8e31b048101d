use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  Utc,
  Weekday
};

use crate::datetime::{
  Normalizer,
  add_days
};
use crate::model::ViewRange;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum ViewType {
  Day,
  Week,
  Month,
  Schedule
}

impl ViewType {
  pub fn all() -> [Self; 4] {
    [
      Self::Day,
      Self::Week,
      Self::Month,
      Self::Schedule
    ]
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::Day => "day",
      | Self::Week => "week",
      | Self::Month => "month",
      | Self::Schedule => "schedule"
    }
  }

  pub fn from_key(
    key: &str
  ) -> Option<Self> {
    match key
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "day" => Some(Self::Day),
      | "week" => Some(Self::Week),
      | "month" => Some(Self::Month),
      | "schedule" | "list" => {
        Some(Self::Schedule)
      }
      | _ => None
    }
  }
}

impl fmt::Display for ViewType {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

impl FromStr for ViewType {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| {
      anyhow!(
        "unknown view type: {s} \
         (expected day, week, month \
         or schedule)"
      )
    })
  }
}

/// Query window for the view containing `anchor`, with boundaries at local
/// midnight.
#[must_use]
pub fn view_range(
  anchor: DateTime<Utc>,
  view: ViewType,
  tz: &Normalizer
) -> ViewRange {
  let focus = tz.local_date(anchor);
  let (start, end) =
    calendar_date_window(view, focus);
  let range = ViewRange::new(
    tz.local_midnight(start),
    tz.local_midnight(end)
  );
  tracing::trace!(
    view = %view,
    focus = %focus,
    from = %range.from,
    to = %range.to,
    "computed view range"
  );
  range
}

#[must_use]
pub fn next_anchor(
  anchor: DateTime<Utc>,
  view: ViewType,
  tz: &Normalizer
) -> DateTime<Utc> {
  shift_anchor(anchor, view, 1, tz)
}

#[must_use]
pub fn previous_anchor(
  anchor: DateTime<Utc>,
  view: ViewType,
  tz: &Normalizer
) -> DateTime<Utc> {
  shift_anchor(anchor, view, -1, tz)
}

fn shift_anchor(
  anchor: DateTime<Utc>,
  view: ViewType,
  step: i32,
  tz: &Normalizer
) -> DateTime<Utc> {
  let local =
    tz.to_local(anchor).naive_local();
  let date = local.date();
  let shifted = match view {
    | ViewType::Day => {
      add_days(date, i64::from(step))
    }
    | ViewType::Week => {
      add_days(
        date,
        i64::from(step) * 7
      )
    }
    | ViewType::Month
    | ViewType::Schedule => {
      shift_months(date, step)
    }
  };
  tz.local_to_utc(
    shifted.and_time(local.time())
  )
}

/// `[start, end)` local dates covered by a view.
fn calendar_date_window(
  view: ViewType,
  focus: NaiveDate
) -> (NaiveDate, NaiveDate) {
  match view {
    | ViewType::Day => {
      (focus, add_days(focus, 1))
    }
    | ViewType::Week => {
      let start = start_of_week(
        focus,
        Weekday::Mon
      );
      (start, add_days(start, 7))
    }
    | ViewType::Month
    | ViewType::Schedule => {
      let start = first_day_of_month(
        focus.year(),
        focus.month()
      );
      (start, shift_months(start, 1))
    }
  }
}

pub(crate) fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let mut year = date.year();
  let mut month =
    date.month() as i32 + months;

  while month < 1 {
    month += 12;
    year = year.saturating_sub(1);
  }
  while month > 12 {
    month -= 12;
    year = year.saturating_add(1);
  }

  let month = month as u32;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

pub(crate) fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

pub(crate) fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    NaiveDate,
    TimeZone,
    Timelike,
    Utc
  };

  use super::*;

  fn utc(
    y: i32,
    m: u32,
    d: u32,
    h: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, m, d, h, 0, 0)
      .single()
      .expect("valid instant")
  }

  #[test]
  fn week_range_starts_on_monday() {
    let tz = Normalizer::utc();
    let range = view_range(
      utc(2024, 3, 14, 15),
      ViewType::Week,
      &tz
    );
    assert_eq!(
      range.from,
      utc(2024, 3, 11, 0)
    );
    assert_eq!(range.to, utc(2024, 3, 18, 0));
  }

  #[test]
  fn week_range_uses_local_midnights() {
    let tz = Normalizer::new(
      chrono_tz::America::New_York
    );
    let range = view_range(
      utc(2024, 3, 14, 15),
      ViewType::Week,
      &tz
    );
    // EDT begins on Sunday March 10, so both edges are UTC-4.
    assert_eq!(
      range.from,
      utc(2024, 3, 11, 4)
    );
    assert_eq!(range.to, utc(2024, 3, 18, 4));
  }

  #[test]
  fn day_range_spans_one_local_day() {
    let tz = Normalizer::new(
      chrono_tz::Asia::Tokyo
    );
    // 20:00Z on Jan 7 is already Jan 8 in Tokyo.
    let range = view_range(
      utc(2024, 1, 7, 20),
      ViewType::Day,
      &tz
    );
    assert_eq!(
      range.from,
      utc(2024, 1, 7, 15)
    );
    assert_eq!(range.to, utc(2024, 1, 8, 15));
  }

  #[test]
  fn month_and_schedule_share_boundaries() {
    let tz = Normalizer::utc();
    let anchor = utc(2024, 2, 20, 9);
    let month = view_range(
      anchor,
      ViewType::Month,
      &tz
    );
    let schedule = view_range(
      anchor,
      ViewType::Schedule,
      &tz
    );
    assert_eq!(month, schedule);
    assert_eq!(
      month.from,
      utc(2024, 2, 1, 0)
    );
    assert_eq!(month.to, utc(2024, 3, 1, 0));

    let december = view_range(
      utc(2024, 12, 5, 0),
      ViewType::Month,
      &tz
    );
    assert_eq!(
      december.to,
      utc(2025, 1, 1, 0)
    );
  }

  #[test]
  fn month_step_clamps_to_shorter_month() {
    let tz = Normalizer::utc();
    let next = next_anchor(
      utc(2024, 1, 31, 10),
      ViewType::Month,
      &tz
    );
    assert_eq!(next.month(), 2);
    assert_eq!(next.day(), 29);
    assert_eq!(next.hour(), 10);

    let non_leap = next_anchor(
      utc(2023, 1, 31, 10),
      ViewType::Month,
      &tz
    );
    assert_eq!(non_leap.day(), 28);

    let back = previous_anchor(
      utc(2024, 3, 31, 10),
      ViewType::Schedule,
      &tz
    );
    assert_eq!(back.month(), 2);
    assert_eq!(back.day(), 29);
  }

  #[test]
  fn day_and_week_steps_keep_wall_clock() {
    let tz = Normalizer::new(
      chrono_tz::America::New_York
    );
    // 09:00 EST Saturday, stepping a week lands on 09:00 EDT.
    let anchor = utc(2024, 3, 9, 14);
    let next = next_anchor(
      anchor,
      ViewType::Week,
      &tz
    );
    assert_eq!(next, utc(2024, 3, 16, 13));
    let local = tz.to_local(next);
    assert_eq!(local.hour(), 9);

    let prev = previous_anchor(
      anchor,
      ViewType::Day,
      &tz
    );
    assert_eq!(
      tz.local_date(prev),
      NaiveDate::from_ymd_opt(2024, 3, 8)
        .expect("valid date")
    );
  }

  #[test]
  fn parses_view_keys() {
    for view in ViewType::all() {
      assert_eq!(
        view
          .as_key()
          .parse::<ViewType>()
          .expect("parse view"),
        view
      );
    }
    assert!(
      "fortnight"
        .parse::<ViewType>()
        .is_err()
    );
  }
}
