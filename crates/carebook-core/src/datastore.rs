use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::datetime::Normalizer;
use crate::model::{AvailabilityRule, BlockedInterval, Booking, ViewRange};
use crate::recurrence::rule_may_intersect;

/// Line-oriented JSON store standing in for the platform's query layer.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub rules_path: PathBuf,
    pub bookings_path: PathBuf,
    pub blocked_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let rules_path = data_dir.join("rules.data");
        let bookings_path = data_dir.join("bookings.data");
        let blocked_path = data_dir.join("blocked.data");

        for path in [&rules_path, &bookings_path, &blocked_path] {
            if !path.exists() {
                fs::write(path, "")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            rules = %rules_path.display(),
            bookings = %bookings_path.display(),
            blocked = %blocked_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            rules_path,
            bookings_path,
            blocked_path,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_rules(&self) -> anyhow::Result<Vec<AvailabilityRule>> {
        load_jsonl(&self.rules_path).context("failed to load rules.data")
    }

    /// Rules that can produce occurrences in `window`. Callers must expand
    /// with the same window they fetched with.
    #[tracing::instrument(skip(self, tz), fields(from = %window.from, to = %window.to))]
    pub fn load_rules_for_window(
        &self,
        window: &ViewRange,
        tz: &Normalizer,
    ) -> anyhow::Result<Vec<AvailabilityRule>> {
        let rules = self.load_rules()?;
        let total = rules.len();
        let candidates: Vec<AvailabilityRule> = rules
            .into_iter()
            .filter(|rule| rule_may_intersect(rule, window, tz))
            .collect();
        debug!(total, candidates = candidates.len(), "filtered rules for window");
        Ok(candidates)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_bookings(&self) -> anyhow::Result<Vec<Booking>> {
        load_jsonl(&self.bookings_path).context("failed to load bookings.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_blocked(&self) -> anyhow::Result<Vec<BlockedInterval>> {
        load_jsonl(&self.blocked_path).context("failed to load blocked.data")
    }

    #[tracing::instrument(skip(self, rules))]
    pub fn save_rules(&self, rules: &[AvailabilityRule]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.rules_path, rules).context("failed to save rules.data")
    }

    #[tracing::instrument(skip(self, bookings))]
    pub fn save_bookings(&self, bookings: &[Booking]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.bookings_path, bookings).context("failed to save bookings.data")
    }

    #[tracing::instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn add_rule(&self, rule: AvailabilityRule) -> anyhow::Result<Vec<AvailabilityRule>> {
        let mut rules = self.load_rules()?;
        if rules.iter().any(|existing| existing.id == rule.id) {
            bail!("rule already exists: {}", rule.id);
        }
        rules.push(rule);
        rules.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        self.save_rules(&rules)?;
        Ok(rules)
    }

    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    pub fn add_booking(&self, booking: Booking) -> anyhow::Result<Vec<Booking>> {
        let rules = self.load_rules()?;
        if let Some(rule_id) = booking.rule_id.as_deref()
            && !rules.iter().any(|rule| rule.id == rule_id)
        {
            return Err(anyhow!("booking references unknown rule: {rule_id}"));
        }

        let mut bookings = self.load_bookings()?;
        bookings.push(booking);
        bookings.sort_by_key(|booking| booking.start_time);
        self.save_bookings(&bookings)?;
        Ok(bookings)
    }

    #[tracing::instrument(skip(self, interval))]
    pub fn add_blocked(&self, interval: BlockedInterval) -> anyhow::Result<()> {
        let mut blocked = self.load_blocked()?;
        blocked.push(interval);
        blocked.sort_by_key(|interval| interval.start_time);
        save_jsonl_atomic(&self.blocked_path, &blocked).context("failed to save blocked.data")
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
