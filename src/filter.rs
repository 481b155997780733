//! Per-record filtering.
//!
//! One immutable [`FilterCriteria`] is built per run and applied to every
//! record, whether it came from indexed access or from carving. Steps run in
//! a fixed order and the first failing step decides.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use tracing::warn;

use crate::config::FilterConfig;
use crate::evtx::EvtxRecord;
use crate::util::parse_optional_time;

/// Closed interval; an unset bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, stop: Option<DateTime<Utc>>) -> Self {
        Self { start, stop }
    }

    pub fn is_active(&self) -> bool {
        self.start.is_some() || self.stop.is_some()
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        if let Some(start) = &self.start {
            if ts < start {
                return false;
            }
        }
        if let Some(stop) = &self.stop {
            if ts > stop {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    EventId,
    User,
    Time,
}

#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    event_ids: Option<HashSet<i64>>,
    excluded_users: Option<HashSet<String>>,
    time_range: TimeRange,
    fields: Option<HashSet<String>>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_ids<I: IntoIterator<Item = i64>>(mut self, ids: I) -> Self {
        self.event_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn excluding_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_users = Some(
            users
                .into_iter()
                .map(|user| user.as_ref().to_lowercase())
                .collect(),
        );
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    pub fn keeping_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fields = Some(
            fields
                .into_iter()
                .map(|field| field.as_ref().to_lowercase())
                .collect(),
        );
        self
    }

    /// Empty lists in the configuration leave the corresponding step off.
    pub fn from_config(cfg: &FilterConfig) -> Result<Self> {
        let mut criteria = Self::new();
        if !cfg.event_ids.is_empty() {
            criteria = criteria.with_event_ids(cfg.event_ids.iter().copied());
        }
        if !cfg.exclude_users.is_empty() {
            criteria = criteria.excluding_users(&cfg.exclude_users);
        }
        if !cfg.fields.is_empty() {
            criteria = criteria.keeping_fields(&cfg.fields);
        }
        let start = parse_optional_time(cfg.start.as_deref()).context("invalid start bound")?;
        let stop = parse_optional_time(cfg.stop.as_deref()).context("invalid stop bound")?;
        Ok(criteria.with_time_range(TimeRange::new(start, stop)))
    }

    pub fn time_range(&self) -> &TimeRange {
        &self.time_range
    }

    /// Decide on `record`, projecting its fields when it is kept.
    pub fn apply(&self, record: &mut EvtxRecord) -> Verdict {
        if let Some(ids) = &self.event_ids {
            if !ids.is_empty() {
                let member = record.event_id().map(|id| ids.contains(&id)).unwrap_or(false);
                if !member {
                    return Verdict::Drop(DropReason::EventId);
                }
            }
        }

        if let Some(users) = &self.excluded_users {
            if let Ok(user) = record.username() {
                if users.contains(&user.to_lowercase()) {
                    return Verdict::Drop(DropReason::User);
                }
            }
        }

        if self.time_range.is_active() {
            match record.timestamp() {
                Ok(ts) => {
                    if !self.time_range.contains(&ts) {
                        return Verdict::Drop(DropReason::Time);
                    }
                }
                Err(err) => warn!(
                    record_id = record.record_id,
                    "no usable timestamp, keeping record: {err}"
                ),
            }
        }

        if let Some(fields) = &self.fields {
            project_fields(&mut record.value, fields);
        }
        Verdict::Keep
    }
}

/// Keep only leaves whose lowercased key is allowed. Containers are judged
/// after their children: one left empty is removed too.
pub fn project_fields(value: &mut Json, allowed: &HashSet<String>) {
    if let Json::Object(map) = value {
        map.retain(|key, child| {
            if child.is_object() {
                project_fields(child, allowed);
                child.as_object().is_some_and(|inner| !inner.is_empty())
            } else {
                allowed.contains(&key.to_lowercase())
            }
        });
    }
}
