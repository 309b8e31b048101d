use chrono::{
  DateTime,
  Duration,
  Timelike,
  Utc
};
use tracing::debug;

use crate::datetime::Normalizer;
use crate::model::{
  AvailabilityRule,
  BlockedInterval,
  Booking,
  CalculatedSlot,
  Occurrence,
  SchedulingRule,
  SlotStatus
};

/// Cuts `[start, end)` slots of `duration_minutes` out of an occurrence.
///
/// Continuous slots run back to back from the occurrence start. Aligned
/// rules start each slot on the first local `:00` (or `:00`/`:30`)
/// boundary at or after the previous slot's end. Slots never overhang the
/// occurrence.
#[must_use]
pub fn cut_slots(
  occurrence: &Occurrence,
  duration_minutes: u32,
  scheduling_rule: SchedulingRule,
  tz: &Normalizer
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
  if duration_minutes == 0 {
    return Vec::new();
  }

  let length = Duration::minutes(
    i64::from(duration_minutes)
  );
  let alignment =
    scheduling_rule.alignment_minutes();

  let mut slots = Vec::new();
  let mut cursor = align_up(
    occurrence.start_time,
    alignment,
    tz
  );
  while cursor + length
    <= occurrence.end_time
  {
    let end = cursor + length;
    slots.push((cursor, end));
    cursor = align_up(end, alignment, tz);
  }
  slots
}

fn align_up(
  instant: DateTime<Utc>,
  alignment: Option<u32>,
  tz: &Normalizer
) -> DateTime<Utc> {
  let Some(alignment) = alignment
  else {
    return instant;
  };

  let local = tz.to_local(instant);
  let into_bucket = i64::from(
    local.minute() % alignment
  ) * 60
    + i64::from(local.second());
  let nanos =
    i64::from(local.nanosecond());
  if into_bucket == 0 && nanos == 0 {
    return instant;
  }

  instant
    + Duration::seconds(
      i64::from(alignment) * 60
        - into_bucket
    )
    - Duration::nanoseconds(nanos)
}

/// Materializes every service slot of the rule's occurrences with its
/// booking state.
///
/// A slot overlapping any of the rule's bookings that still occupies time
/// is `BOOKED`, whichever occurrence the booking was attached to;
/// otherwise one overlapping a blocked interval is `BLOCKED`. Slot ids end
/// in the UTC start so repeated local hours stay distinct.
#[tracing::instrument(
  skip_all,
  fields(
    rule_id = %rule.id,
    occurrences = occurrences.len()
  )
)]
pub fn materialize_slots(
  rule: &AvailabilityRule,
  occurrences: &[Occurrence],
  bookings: &[Booking],
  blocked: &[BlockedInterval],
  tz: &Normalizer
) -> Vec<CalculatedSlot> {
  let occupying = bookings
    .iter()
    .filter(|booking| {
      booking.rule_id.as_deref()
        == Some(rule.id.as_str())
        && booking.status.occupies_slot()
    })
    .collect::<Vec<_>>();
  let mut slots = Vec::new();

  for occurrence in occurrences
    .iter()
    .filter(|occurrence| {
      occurrence.rule_id == rule.id
    })
  {
    for service in
      &rule.available_services
    {
      for (start, end) in cut_slots(
        occurrence,
        service.duration_minutes,
        rule.scheduling_rule,
        tz
      ) {
        let booked =
          occupying.iter().any(|booking| {
            booking.overlaps(start, end)
          });
        let status = if booked {
          SlotStatus::Booked
        } else if blocked.iter().any(
          |interval| {
            interval.overlaps(start, end)
          }
        ) {
          SlotStatus::Blocked
        } else {
          SlotStatus::Available
        };

        slots.push(CalculatedSlot {
          id: format!(
            "{}-{}-{}",
            occurrence.id,
            service.service_id,
            start.format("%H%MZ")
          ),
          rule_id: rule.id.clone(),
          occurrence_id: occurrence
            .id
            .clone(),
          service_id: service
            .service_id
            .clone(),
          start_time: start,
          end_time: end,
          price_cents: service
            .price_cents,
          status
        });
      }
    }
  }

  slots.sort_by(|a, b| {
    a.start_time
      .cmp(&b.start_time)
      .then_with(|| a.id.cmp(&b.id))
  });
  debug!(
    slots = slots.len(),
    "materialized slots"
  );
  slots
}
