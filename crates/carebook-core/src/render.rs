use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::Normalizer;
use crate::grid::{DayWindow, Granularity, grid_position, month_cell};
use crate::model::{AvailabilityRule, CalculatedSlot, Occurrence, SlotStatus, ViewRange};
use crate::range::ViewType;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, range, tz))]
    pub fn print_range(
        &mut self,
        view: ViewType,
        range: &ViewRange,
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
        tz: &Normalizer,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "view      {view}")?;
        writeln!(out, "timezone  {}", tz.timezone())?;
        writeln!(out, "from      {}  ({})", range.from.to_rfc3339(), local_stamp(range.from, tz))?;
        writeln!(out, "to        {}  ({})", range.to.to_rfc3339(), local_stamp(range.to, tz))?;
        writeln!(out, "previous  {}", local_stamp(previous, tz))?;
        writeln!(out, "next      {}", local_stamp(next, tz))?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(count = occurrences.len()))]
    pub fn print_occurrences(
        &mut self,
        occurrences: &[Occurrence],
        view: ViewType,
        tz: &Normalizer,
        window: DayWindow,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Date".to_string(),
            "Start".to_string(),
            "End".to_string(),
            "Bookings".to_string(),
            if view == ViewType::Month {
                "Cell".to_string()
            } else {
                "Rows".to_string()
            },
        ];

        let mut rows = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            let local_start = tz.to_local(occurrence.start_time);
            let date = local_start.format("%a %Y-%m-%d").to_string();
            let date = if tz.is_today(occurrence.start_time, now) {
                self.paint(&date, "36")
            } else {
                date
            };

            let grid = if view == ViewType::Month {
                let cell = month_cell(local_start.date_naive());
                format!("{}:{}", cell.week_row, cell.column)
            } else {
                grid_position(
                    occurrence.start_time,
                    occurrence.end_time,
                    local_start.date_naive(),
                    window,
                    granularity,
                    tz,
                )
                .map(|position| format!("{}+{}", position.row_start, position.row_span))
                .unwrap_or_else(|| "-".to_string())
            };

            let active = occurrence
                .bookings
                .iter()
                .filter(|booking| booking.status.occupies_slot())
                .count();
            let bookings = if active > 0 {
                self.paint(&active.to_string(), "33")
            } else {
                active.to_string()
            };

            rows.push(vec![
                occurrence.id.clone(),
                date,
                local_start.format("%H:%M").to_string(),
                tz.to_local(occurrence.end_time).format("%H:%M").to_string(),
                bookings,
                grid,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(count = slots.len()))]
    pub fn print_slots(&mut self, slots: &[CalculatedSlot], tz: &Normalizer) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "Slot".to_string(),
            "Service".to_string(),
            "Start".to_string(),
            "End".to_string(),
            "Price".to_string(),
            "Status".to_string(),
        ];

        let mut rows = Vec::with_capacity(slots.len());
        for slot in slots {
            let status = match slot.status {
                SlotStatus::Available => self.paint("available", "32"),
                SlotStatus::Booked => self.paint("booked", "33"),
                SlotStatus::Blocked => self.paint("blocked", "31"),
            };
            rows.push(vec![
                slot.id.clone(),
                slot.service_id.clone(),
                local_stamp(slot.start_time, tz),
                tz.to_local(slot.end_time).format("%H:%M").to_string(),
                format!("{}.{:02}", slot.price_cents / 100, slot.price_cents % 100),
                status,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(count = rules.len()))]
    pub fn print_rules(&mut self, rules: &[AvailabilityRule], tz: &Normalizer) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Owner".to_string(),
            "From".to_string(),
            "Window".to_string(),
            "Days".to_string(),
            "Until".to_string(),
            "Issue".to_string(),
        ];

        let mut rows = Vec::with_capacity(rules.len());
        for rule in rules {
            let days = if rule.is_recurring {
                rule.active_weekdays()
                    .iter()
                    .map(|day| weekday_label(*day))
                    .collect::<Vec<_>>()
                    .join(",")
            } else {
                "once".to_string()
            };
            let until = rule
                .recurrence_end_date
                .map(|end| tz.to_local(end).format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            let issue = rule
                .integrity_issue()
                .map(|issue| self.paint(&issue.to_string(), "31"))
                .unwrap_or_default();

            rows.push(vec![
                rule.id.clone(),
                rule.owner.to_string(),
                tz.to_local(rule.start_time).format("%Y-%m-%d").to_string(),
                format!(
                    "{}-{}",
                    tz.to_local(rule.start_time).format("%H:%M"),
                    tz.to_local(rule.end_time).format("%H:%M")
                ),
                days,
                until,
                issue,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn local_stamp(instant: DateTime<Utc>, tz: &Normalizer) -> String {
    tz.to_local(instant).format("%a %Y-%m-%d %H:%M").to_string()
}

fn weekday_label(day: u8) -> &'static str {
    match day {
        0 => "Sun",
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        _ => "Sat",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
