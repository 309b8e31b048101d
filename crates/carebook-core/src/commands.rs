use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::{AddBookingArgs, AddRuleArgs, Command};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{Normalizer, parse_anchor_expr};
use crate::model::{
    AvailabilityRule, BlockedInterval, Booking, BookingStatus, RuleOwner, SchedulingRule,
    ServiceOffering, ViewRange,
};
use crate::range::{ViewType, next_anchor, previous_anchor, view_range};
use crate::recurrence::expand_rules;
use crate::render::Renderer;
use crate::slots::materialize_slots;

#[instrument(skip(store, cfg, renderer, tz, command))]
pub fn dispatch(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    tz: &Normalizer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, timezone = %tz.timezone(), "dispatching command");

    match command {
        Command::Range { view, anchor } => cmd_range(renderer, tz, view, anchor.as_deref(), now),
        Command::Agenda { view, anchor } => {
            cmd_agenda(store, cfg, renderer, tz, view, anchor.as_deref(), now)
        }
        Command::Slots {
            view,
            anchor,
            service,
        } => cmd_slots(
            store,
            cfg,
            renderer,
            tz,
            view,
            anchor.as_deref(),
            service.as_deref(),
            now,
        ),
        Command::Rules => cmd_rules(store, renderer, tz),
        Command::AddRule(args) => cmd_add_rule(store, tz, args, now),
        Command::AddBooking(args) => cmd_add_booking(store, tz, args, now),
        Command::Block { start, end, reason } => cmd_block(store, tz, &start, &end, reason, now),
    }
}

fn resolve_range(
    view: ViewType,
    anchor: Option<&str>,
    tz: &Normalizer,
    now: DateTime<Utc>,
) -> anyhow::Result<(DateTime<Utc>, ViewRange)> {
    let anchor = match anchor {
        Some(raw) => parse_anchor_expr(raw, now, tz)?,
        None => now,
    };
    Ok((anchor, view_range(anchor, view, tz)))
}

#[instrument(skip(renderer, tz, now))]
fn cmd_range(
    renderer: &mut Renderer,
    tz: &Normalizer,
    view: ViewType,
    anchor: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command range");

    let (anchor, range) = resolve_range(view, anchor, tz, now)?;
    renderer.print_range(
        view,
        &range,
        previous_anchor(anchor, view, tz),
        next_anchor(anchor, view, tz),
        tz,
    )
}

#[instrument(skip(store, cfg, renderer, tz, now))]
fn cmd_agenda(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    tz: &Normalizer,
    view: ViewType,
    anchor: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command agenda");

    let (_, range) = resolve_range(view, anchor, tz, now)?;
    let limits = cfg.expansion_limits()?;
    let rules = store.load_rules_for_window(&range, tz)?;
    let bookings = store.load_bookings()?;
    let occurrences = expand_rules(&rules, &bookings, &range, tz, &limits)?;

    if occurrences.is_empty() {
        println!("No availability between {} and {}.", range.from, range.to);
        return Ok(());
    }

    renderer.print_occurrences(
        &occurrences,
        view,
        tz,
        cfg.day_window()?,
        cfg.granularity()?,
        now,
    )
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip(store, cfg, renderer, tz, now))]
fn cmd_slots(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    tz: &Normalizer,
    view: ViewType,
    anchor: Option<&str>,
    service: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command slots");

    let (_, range) = resolve_range(view, anchor, tz, now)?;
    let limits = cfg.expansion_limits()?;
    let rules = store.load_rules_for_window(&range, tz)?;
    let bookings = store.load_bookings()?;
    let blocked = store.load_blocked()?;
    let occurrences = expand_rules(&rules, &bookings, &range, tz, &limits)?;

    let mut slots = Vec::new();
    for rule in &rules {
        slots.extend(
            materialize_slots(rule, &occurrences, &bookings, &blocked, tz)
                .into_iter()
                .filter(|slot| service.is_none_or(|wanted| slot.service_id == wanted)),
        );
    }
    slots.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));

    if slots.is_empty() {
        println!("No slots between {} and {}.", range.from, range.to);
        return Ok(());
    }

    renderer.print_slots(&slots, tz)
}

#[instrument(skip(store, renderer, tz))]
fn cmd_rules(
    store: &mut DataStore,
    renderer: &mut Renderer,
    tz: &Normalizer,
) -> anyhow::Result<()> {
    info!("command rules");

    let rules = store.load_rules()?;
    if rules.is_empty() {
        println!("No availability rules.");
        return Ok(());
    }
    renderer.print_rules(&rules, tz)
}

#[instrument(skip(store, tz, args, now), fields(rule_id = %args.id))]
fn cmd_add_rule(
    store: &mut DataStore,
    tz: &Normalizer,
    args: AddRuleArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add-rule");

    let rule = build_rule(args, tz, now)?;
    if let Some(issue) = rule.integrity_issue() {
        bail!("rule {} is invalid: {issue}", rule.id);
    }

    let id = rule.id.clone();
    let rules = store.add_rule(rule)?;
    debug!(rule_count = rules.len(), "rule added");
    println!("Created rule {id}.");
    Ok(())
}

fn build_rule(
    args: AddRuleArgs,
    tz: &Normalizer,
    now: DateTime<Utc>,
) -> anyhow::Result<AvailabilityRule> {
    let owner = match (args.provider, args.organization, args.location) {
        (Some(provider_id), None, None) => RuleOwner::Provider { provider_id },
        (None, Some(organization_id), Some(location_id)) => RuleOwner::Organization {
            organization_id,
            location_id,
        },
        _ => bail!("a rule needs --provider or both --organization and --location"),
    };

    if let Some(day) = args.days.iter().find(|day| **day > 6) {
        bail!("weekday {day} out of range (0 = Sunday .. 6 = Saturday)");
    }

    let scheduling_rule = SchedulingRule::from_key(&args.scheduling_rule)
        .ok_or_else(|| anyhow!("unknown scheduling rule: {}", args.scheduling_rule))?;

    let services = args
        .services
        .iter()
        .map(|raw| parse_service(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let start_time = parse_anchor_expr(&args.start, now, tz).context("invalid --start")?;
    let end_time = parse_anchor_expr(&args.end, now, tz).context("invalid --end")?;
    let recurrence_end_date = args
        .until
        .as_deref()
        .map(|raw| parse_anchor_expr(raw, now, tz).context("invalid --until"))
        .transpose()?;

    if !args.days.is_empty() && recurrence_end_date.is_none() {
        warn!(rule_id = %args.id, "recurring rule has no end date; it repeats indefinitely");
    }

    Ok(AvailabilityRule {
        id: args.id,
        owner,
        start_time,
        end_time,
        is_recurring: !args.days.is_empty(),
        recurring_days: args.days,
        recurrence_end_date,
        scheduling_rule,
        available_services: services,
    })
}

/// Parses `SERVICE:MINUTES[:CENTS]`.
fn parse_service(raw: &str) -> anyhow::Result<ServiceOffering> {
    let mut parts = raw.split(':');
    let service_id = parts
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("service needs an id: {raw}"))?;
    let duration_minutes = parts
        .next()
        .ok_or_else(|| anyhow!("service needs a duration in minutes: {raw}"))?
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid service duration: {raw}"))?;
    let price_cents = parts
        .next()
        .map(|cents| cents.trim().parse::<u32>())
        .transpose()
        .with_context(|| format!("invalid service price: {raw}"))?
        .unwrap_or(0);

    if parts.next().is_some() {
        bail!("too many fields in service: {raw}");
    }
    if duration_minutes == 0 {
        bail!("service duration must be positive: {raw}");
    }

    Ok(ServiceOffering {
        service_id: service_id.to_string(),
        duration_minutes,
        price_cents,
    })
}

#[instrument(skip(store, tz, args, now), fields(rule_id = %args.rule))]
fn cmd_add_booking(
    store: &mut DataStore,
    tz: &Normalizer,
    args: AddBookingArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add-booking");

    let status = BookingStatus::from_key(&args.status)
        .ok_or_else(|| anyhow!("unknown booking status: {}", args.status))?;
    let start = parse_anchor_expr(&args.start, now, tz).context("invalid --start")?;
    let end = parse_anchor_expr(&args.end, now, tz).context("invalid --end")?;
    if end <= start {
        bail!("booking must end after it starts");
    }

    let mut booking = Booking::new_for_rule(&args.rule, args.client, start, end);
    booking.status = status;
    booking.slot_id = args.slot;
    booking.price_cents = args.price_cents;

    let id = booking.id;
    store.add_booking(booking)?;
    println!("Created booking {id}.");
    Ok(())
}

#[instrument(skip(store, tz, now))]
fn cmd_block(
    store: &mut DataStore,
    tz: &Normalizer,
    start: &str,
    end: &str,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command block");

    let start_time = parse_anchor_expr(start, now, tz).context("invalid --start")?;
    let end_time = parse_anchor_expr(end, now, tz).context("invalid --end")?;
    if end_time <= start_time {
        bail!("blocked interval must end after it starts");
    }

    store.add_blocked(BlockedInterval {
        start_time,
        end_time,
        reason,
    })?;
    println!(
        "Blocked {} to {}.",
        tz.to_local(start_time).format("%Y-%m-%d %H:%M"),
        tz.to_local(end_time).format("%Y-%m-%d %H:%M")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    use super::*;

    fn add_rule_args() -> AddRuleArgs {
        AddRuleArgs {
            id: "weekly".to_string(),
            start: "2024-01-08T09:00".to_string(),
            end: "2024-01-08T12:00".to_string(),
            days: vec![1, 3],
            until: Some("2024-03-31".to_string()),
            scheduling_rule: "on_the_half_hour".to_string(),
            services: vec!["consult:30:4500".to_string(), "follow-up:15".to_string()],
            provider: Some("dr-lee".to_string()),
            organization: None,
            location: None,
        }
    }

    #[test]
    fn service_specs_parse_with_optional_price() {
        assert_eq!(
            parse_service("consult:30:4500").expect("parse service"),
            ServiceOffering {
                service_id: "consult".to_string(),
                duration_minutes: 30,
                price_cents: 4_500,
            }
        );
        assert_eq!(
            parse_service("check:15").expect("parse service").price_cents,
            0
        );
        assert!(parse_service("consult").is_err());
        assert!(parse_service("consult:0").is_err());
        assert!(parse_service(":30").is_err());
        assert!(parse_service("a:1:2:3").is_err());
    }

    #[test]
    fn rule_times_are_read_in_viewer_timezone() {
        let tz = Normalizer::new(New_York);
        let now = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("valid now");

        let rule = build_rule(add_rule_args(), &tz, now).expect("build rule");
        assert_eq!(
            rule.start_time,
            Utc.with_ymd_and_hms(2024, 1, 8, 14, 0, 0)
                .single()
                .expect("valid start")
        );
        assert!(rule.is_recurring);
        assert_eq!(rule.scheduling_rule, SchedulingRule::OnTheHalfHour);
        assert_eq!(rule.available_services.len(), 2);
        assert_eq!(
            rule.recurrence_end_date,
            Some(
                Utc.with_ymd_and_hms(2024, 3, 31, 4, 0, 0)
                    .single()
                    .expect("valid until")
            )
        );
    }

    #[test]
    fn rule_owner_and_weekdays_are_validated() {
        let tz = Normalizer::utc();
        let now = Utc::now();

        let mut args = add_rule_args();
        args.provider = None;
        assert!(build_rule(args, &tz, now).is_err());

        let mut args = add_rule_args();
        args.days = vec![7];
        assert!(build_rule(args, &tz, now).is_err());

        let mut args = add_rule_args();
        args.provider = None;
        args.organization = Some("clinic".to_string());
        args.location = Some("north".to_string());
        let rule = build_rule(args, &tz, now).expect("build rule");
        assert_eq!(rule.owner.to_string(), "org:clinic@north");
    }
}
