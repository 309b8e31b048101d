use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  NaiveTime,
  Utc,
  Weekday
};
use serde::Serialize;

use crate::datetime::Normalizer;
use crate::range::{
  first_day_of_month,
  start_of_week
};

const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Granularity {
  FiveMinutes,
  Hour
}

impl Granularity {
  pub fn minutes(self) -> i64 {
    match self {
      | Self::FiveMinutes => 5,
      | Self::Hour => 60
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
      | "5m" | "5" | "fine" => {
        Some(Self::FiveMinutes)
      }
      | "hour" | "60m" | "60"
      | "coarse" => Some(Self::Hour),
      | _ => None
    }
  }
}

impl FromStr for Granularity {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| {
      anyhow!(
        "unknown grid granularity: {s}"
      )
    })
  }
}

/// Visible hours of a day column, `hour_start:00` through the end of
/// `hour_end`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct DayWindow {
  pub hour_start: u32,
  pub hour_end:   u32
}

impl Default for DayWindow {
  fn default() -> Self {
    Self {
      hour_start: 0,
      hour_end:   23
    }
  }
}

impl DayWindow {
  /// Clamps hours into 0..=23 with `hour_end >= hour_start`.
  #[must_use]
  pub fn sanitized(
    hour_start: u32,
    hour_end: u32
  ) -> Self {
    let hour_start = hour_start.min(23);
    let hour_end =
      hour_end.min(23).max(hour_start);
    Self {
      hour_start,
      hour_end
    }
  }

  fn start_minute(self) -> i64 {
    i64::from(self.hour_start) * 60
  }

  fn end_minute(self) -> i64 {
    (i64::from(self.hour_end) + 1) * 60
  }

  pub fn row_count(
    self,
    granularity: Granularity
  ) -> u32 {
    let span = self.end_minute()
      - self.start_minute();
    (span / granularity.minutes())
      as u32
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct GridPosition {
  /// 0-based row inside the visible window.
  pub row_start: u32,
  pub row_span:  u32
}

/// Row placement of `[start, end)` in the column for local `day`.
///
/// Events reaching outside the visible window are clipped to it; `None`
/// means nothing of the event is visible in that column.
#[must_use]
pub fn grid_position(
  start: DateTime<Utc>,
  end: DateTime<Utc>,
  day: NaiveDate,
  window: DayWindow,
  granularity: Granularity,
  tz: &Normalizer
) -> Option<GridPosition> {
  if end <= start {
    return None;
  }

  let midnight =
    day.and_time(NaiveTime::MIN);
  let start_minute = (tz
    .to_local(start)
    .naive_local()
    - midnight)
    .num_minutes();
  let end_minute = minutes_rounded_up(
    (tz.to_local(end).naive_local()
      - midnight)
      .num_seconds()
  );

  if end_minute <= 0
    || start_minute >= MINUTES_PER_DAY
  {
    return None;
  }

  let visible_start =
    start_minute.max(window.start_minute());
  let visible_end =
    end_minute.min(window.end_minute());
  if visible_end <= visible_start {
    return None;
  }

  let step = granularity.minutes();
  let offset_start = visible_start
    - window.start_minute();
  let offset_end =
    visible_end - window.start_minute();
  let row_start = offset_start / step;
  let row_end =
    (offset_end + step - 1) / step;

  Some(GridPosition {
    row_start: row_start as u32,
    row_span:  (row_end - row_start)
      .max(1)
      as u32
  })
}

fn minutes_rounded_up(
  seconds: i64
) -> i64 {
  seconds.div_euclid(60)
    + i64::from(
      seconds.rem_euclid(60) != 0
    )
}

/// Monday-start cell of a date in its month grid.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct MonthCell {
  pub week_row: u32,
  pub column:   u32
}

#[must_use]
pub fn month_cell(
  day: NaiveDate
) -> MonthCell {
  let grid_start = start_of_week(
    first_day_of_month(
      day.year(),
      day.month()
    ),
    Weekday::Mon
  );
  let offset =
    (day - grid_start).num_days();
  MonthCell {
    week_row: (offset / 7) as u32,
    column:   day
      .weekday()
      .num_days_from_monday()
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone
  };

  use super::*;

  fn utc(
    y: i32,
    m: u32,
    d: u32,
    h: u32,
    min: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, m, d, h, min, 0)
      .single()
      .expect("valid instant")
  }

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn five_minute_rows_inside_window() {
    let tz = Normalizer::utc();
    let window = DayWindow {
      hour_start: 8,
      hour_end:   17
    };
    let position = grid_position(
      utc(2024, 1, 8, 9, 0),
      utc(2024, 1, 8, 9, 45),
      day(2024, 1, 8),
      window,
      Granularity::FiveMinutes,
      &tz
    )
    .expect("visible event");
    assert_eq!(
      position,
      GridPosition {
        row_start: 12,
        row_span:  9
      }
    );
    assert_eq!(
      window.row_count(
        Granularity::FiveMinutes
      ),
      120
    );
  }

  #[test]
  fn hour_rows_round_outward() {
    let tz = Normalizer::utc();
    let position = grid_position(
      utc(2024, 1, 8, 9, 20),
      utc(2024, 1, 8, 10, 10),
      day(2024, 1, 8),
      DayWindow::default(),
      Granularity::Hour,
      &tz
    )
    .expect("visible event");
    assert_eq!(position.row_start, 9);
    assert_eq!(position.row_span, 2);
  }

  #[test]
  fn clamps_events_crossing_window_edges(
  ) {
    let tz = Normalizer::utc();
    let window = DayWindow {
      hour_start: 8,
      hour_end:   17
    };
    let early = grid_position(
      utc(2024, 1, 8, 6, 0),
      utc(2024, 1, 8, 8, 30),
      day(2024, 1, 8),
      window,
      Granularity::FiveMinutes,
      &tz
    )
    .expect("visible tail");
    assert_eq!(
      early,
      GridPosition {
        row_start: 0,
        row_span:  6
      }
    );

    let late = grid_position(
      utc(2024, 1, 8, 17, 30),
      utc(2024, 1, 9, 1, 0),
      day(2024, 1, 8),
      window,
      Granularity::FiveMinutes,
      &tz
    )
    .expect("visible head");
    assert_eq!(late.row_start, 114);
    assert_eq!(late.row_span, 6);
    assert_eq!(
      late.row_start + late.row_span,
      window.row_count(
        Granularity::FiveMinutes
      )
    );
  }

  #[test]
  fn hidden_events_have_no_position() {
    let tz = Normalizer::utc();
    let window = DayWindow {
      hour_start: 8,
      hour_end:   17
    };
    assert!(grid_position(
      utc(2024, 1, 8, 6, 0),
      utc(2024, 1, 8, 7, 0),
      day(2024, 1, 8),
      window,
      Granularity::FiveMinutes,
      &tz
    )
    .is_none());
    assert!(grid_position(
      utc(2024, 1, 9, 9, 0),
      utc(2024, 1, 9, 10, 0),
      day(2024, 1, 8),
      window,
      Granularity::FiveMinutes,
      &tz
    )
    .is_none());
    let start = utc(2024, 1, 8, 9, 0);
    assert!(grid_position(
      start,
      start,
      day(2024, 1, 8),
      window,
      Granularity::Hour,
      &tz
    )
    .is_none());
  }

  #[test]
  fn multi_day_event_fills_middle_column(
  ) {
    let tz = Normalizer::new(
      chrono_tz::Europe::Paris
    );
    let start = utc(2024, 1, 7, 12, 0);
    let position = grid_position(
      start,
      start + Duration::days(3),
      day(2024, 1, 8),
      DayWindow::default(),
      Granularity::Hour,
      &tz
    )
    .expect("visible event");
    assert_eq!(
      position,
      GridPosition {
        row_start: 0,
        row_span:  24
      }
    );
  }

  #[test]
  fn positions_use_local_time() {
    let tz = Normalizer::new(
      chrono_tz::Asia::Kolkata
    );
    // 03:30Z is 09:00 IST.
    let position = grid_position(
      utc(2024, 1, 8, 3, 30),
      utc(2024, 1, 8, 4, 0),
      day(2024, 1, 8),
      DayWindow::default(),
      Granularity::FiveMinutes,
      &tz
    )
    .expect("visible event");
    assert_eq!(position.row_start, 108);
    assert_eq!(position.row_span, 6);
  }

  #[test]
  fn month_cells_are_monday_based() {
    // March 2024 starts on a Friday.
    assert_eq!(
      month_cell(day(2024, 3, 1)),
      MonthCell {
        week_row: 0,
        column:   4
      }
    );
    assert_eq!(
      month_cell(day(2024, 3, 4)),
      MonthCell {
        week_row: 1,
        column:   0
      }
    );
    assert_eq!(
      month_cell(day(2024, 3, 31)),
      MonthCell {
        week_row: 4,
        column:   6
      }
    );
  }

  #[test]
  fn sanitized_window_orders_hours() {
    assert_eq!(
      DayWindow::sanitized(30, 4),
      DayWindow {
        hour_start: 23,
        hour_end:   23
      }
    );
    assert_eq!(
      "hour"
        .parse::<Granularity>()
        .expect("parse granularity"),
      Granularity::Hour
    );
  }
}
