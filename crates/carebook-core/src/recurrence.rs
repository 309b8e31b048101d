use anyhow::bail;
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveTime,
  Timelike,
  Utc
};
use tracing::{
  debug,
  warn
};

use crate::datetime::{
  Normalizer,
  add_days
};
use crate::model::{
  AvailabilityRule,
  Booking,
  Occurrence,
  ViewRange
};

const DEFAULT_MAX_WINDOW_DAYS: i64 =
  731;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct ExpansionLimits {
  pub max_window_days: i64
}

impl Default for ExpansionLimits {
  fn default() -> Self {
    Self {
      max_window_days:
        DEFAULT_MAX_WINDOW_DAYS
    }
  }
}

/// Concrete occurrences of `rule` whose start lies in `window`.
///
/// `bookings` must already be scoped to this rule; each occurrence keeps
/// the ones that fall on its local calendar day. Malformed rules produce
/// no occurrences. The window is not bounded here; callers go through
/// [`expand_rules`] or check it with [`check_window`] first.
#[must_use]
pub fn expand(
  rule: &AvailabilityRule,
  bookings: &[Booking],
  window: &ViewRange,
  tz: &Normalizer
) -> Vec<Occurrence> {
  if rule.start_time >= rule.end_time
    || window.is_empty()
  {
    return Vec::new();
  }

  if !rule.is_recurring {
    if !window.contains(rule.start_time)
    {
      return Vec::new();
    }
    return vec![build_occurrence(
      rule,
      rule.start_time,
      rule.end_time,
      bookings,
      tz
    )];
  }

  let weekdays = rule.active_weekdays();
  if weekdays.is_empty() {
    return Vec::new();
  }

  let first = tz
    .local_date(window.from)
    .max(tz.local_date(rule.start_time));
  let mut last = tz.local_date(window.to);
  if let Some(end) =
    rule.recurrence_end_date
  {
    last = last.min(tz.local_date(end));
  }
  if first > last {
    return Vec::new();
  }

  let start_local = tz
    .to_local(rule.start_time)
    .naive_local();
  let end_local = tz
    .to_local(rule.end_time)
    .naive_local();
  let (Some(start_tod), Some(end_tod)) = (
    NaiveTime::from_hms_opt(
      start_local.hour(),
      start_local.minute(),
      0
    ),
    NaiveTime::from_hms_opt(
      end_local.hour(),
      end_local.minute(),
      0
    )
  ) else {
    return Vec::new();
  };
  let end_day_offset = (end_local
    .date()
    - start_local.date())
  .num_days();

  let mut occurrences = Vec::new();
  let mut day = first;
  while day <= last {
    let weekday_number = day
      .weekday()
      .num_days_from_sunday()
      as u8;
    if weekdays.contains(&weekday_number)
    {
      let start = tz.local_to_utc(
        day.and_time(start_tod)
      );
      let end = tz.local_to_utc(
        add_days(day, end_day_offset)
          .and_time(end_tod)
      );
      if window.contains(start)
        && start >= rule.start_time
        && start < end
      {
        occurrences.push(
          build_occurrence(
            rule, start, end, bookings,
            tz
          )
        );
      }
    }

    let Some(next) = day.succ_opt()
    else {
      break;
    };
    day = next;
  }

  sort_occurrences(&mut occurrences);
  occurrences
}

/// Expands every rule for one query window, scoping `bookings` to their
/// rule and reporting malformed rules as data-integrity warnings.
#[tracing::instrument(
  skip_all,
  fields(
    rules = rules.len(),
    from = %window.from,
    to = %window.to
  )
)]
pub fn expand_rules(
  rules: &[AvailabilityRule],
  bookings: &[Booking],
  window: &ViewRange,
  tz: &Normalizer,
  limits: &ExpansionLimits
) -> anyhow::Result<Vec<Occurrence>> {
  check_window(window, limits)?;

  let mut all = Vec::new();
  for rule in rules {
    if let Some(issue) =
      rule.integrity_issue()
    {
      warn!(
        rule_id = %rule.id,
        owner = %rule.owner,
        %issue,
        "availability rule failed integrity check"
      );
    }

    let scoped = bookings
      .iter()
      .filter(|booking| {
        booking.rule_id.as_deref()
          == Some(rule.id.as_str())
      })
      .cloned()
      .collect::<Vec<_>>();
    all.extend(expand(
      rule, &scoped, window, tz
    ));
  }

  sort_occurrences(&mut all);
  debug!(
    occurrences = all.len(),
    timezone = %tz.timezone(),
    "expanded availability rules"
  );
  Ok(all)
}

/// Rejects empty windows and windows longer than the configured cap.
pub fn check_window(
  window: &ViewRange,
  limits: &ExpansionLimits
) -> anyhow::Result<()> {
  if window.is_empty() {
    bail!(
      "query window is empty: {} .. {}",
      window.from,
      window.to
    );
  }

  let span = window.to - window.from;
  if span
    > Duration::days(
      limits.max_window_days
    )
  {
    bail!(
      "query window of {} days \
       exceeds the limit of {} days",
      span.num_days(),
      limits.max_window_days
    );
  }
  Ok(())
}

/// Fetch predicate for the query layer: true for every rule that can yield
/// an occurrence inside `window`.
///
/// Rules filtered out here would expand to nothing for the same window, so
/// a store that loads candidates with this predicate and then expands with
/// the same window sees exactly what expanding every rule would produce.
/// Fetching with a narrower window than the one later expanded silently
/// drops occurrences.
#[must_use]
pub fn rule_may_intersect(
  rule: &AvailabilityRule,
  window: &ViewRange,
  tz: &Normalizer
) -> bool {
  if !rule.is_recurring {
    return window
      .contains(rule.start_time);
  }

  if tz.local_date(rule.start_time)
    > tz.local_date(window.to)
  {
    return false;
  }

  rule.recurrence_end_date.is_none_or(
    |end| {
      tz.local_date(end)
        >= tz.local_date(window.from)
    }
  )
}

fn build_occurrence(
  rule: &AvailabilityRule,
  start: DateTime<Utc>,
  end: DateTime<Utc>,
  bookings: &[Booking],
  tz: &Normalizer
) -> Occurrence {
  let attached = bookings
    .iter()
    .filter(|booking| {
      tz.is_same_local_day(
        Some(booking.start_time),
        Some(start)
      )
    })
    .cloned()
    .collect();

  Occurrence {
    id:         format!(
      "{}-{}",
      rule.id,
      tz.local_date(start)
        .format("%Y-%m-%d")
    ),
    rule_id:    rule.id.clone(),
    start_time: start,
    end_time:   end,
    bookings:   attached
  }
}

fn sort_occurrences(
  occurrences: &mut [Occurrence]
) {
  occurrences.sort_by(|a, b| {
    a.start_time
      .cmp(&b.start_time)
      .then_with(|| a.id.cmp(&b.id))
  });
}
