//! Schedule records, priorities and recurrence rules.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

/// Status of a schedule record.
///
/// Legal transitions: `{Pending | Queued} -> Processing -> {Completed |
/// Failed}`, `Pending -> Queued` when placed on the build queue,
/// `Completed -> Pending` when the record repeats, `{Pending | Queued} ->
/// Cancelled`. `Failed` stays failed until a caller re-arms the record.
/// A `Queued` record is owned by the build queue and is no longer due for
/// the scheduler's polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    /// Returns true if this status represents a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Priority of a schedule record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Unit of recurrence for repeating schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatFrequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// Options for creating a schedule record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// When the first (or only) run should happen.
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: SchedulePriority,
    #[serde(default)]
    pub repeat: bool,
    pub repeat_frequency: Option<RepeatFrequency>,
    /// Positive multiplier applied to the frequency (e.g. every 2 days).
    pub repeat_interval: Option<u32>,
}

impl ScheduleOptions {
    /// A one-shot schedule at the given time.
    pub fn once(scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at,
            priority: SchedulePriority::default(),
            repeat: false,
            repeat_frequency: None,
            repeat_interval: None,
        }
    }

    /// A recurring schedule starting at the given time.
    pub fn recurring(
        scheduled_at: DateTime<Utc>,
        frequency: RepeatFrequency,
        interval: u32,
    ) -> Self {
        Self {
            scheduled_at,
            priority: SchedulePriority::default(),
            repeat: true,
            repeat_frequency: Some(frequency),
            repeat_interval: Some(interval),
        }
    }

    pub fn with_priority(mut self, priority: SchedulePriority) -> Self {
        self.priority = priority;
        self
    }
}

/// A persisted schedule record for a build job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: ResourceId,
    /// Human-readable label used in logs and status listings.
    pub title: String,
    /// Opaque payload handed to the executor.
    pub payload: serde_json::Value,
    pub status: ScheduleStatus,
    pub priority: SchedulePriority,
    /// First intended execution time.
    pub scheduled_at: DateTime<Utc>,
    /// Next intended execution time; recomputed after each recurring run.
    pub next_run: DateTime<Utc>,
    pub repeat: bool,
    pub repeat_frequency: Option<RepeatFrequency>,
    pub repeat_interval: Option<u32>,
    /// Most recent completed execution, if any.
    pub last_run: Option<DateTime<Utc>>,
    /// When the record was placed on the build queue; cleared once the
    /// queued run finishes.
    pub queued_at: Option<DateTime<Utc>>,
    /// Failure message of the most recent failed attempt.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRecord {
    /// Create a new pending record.
    ///
    /// Returns `InvalidInput` when `repeat` is set without a frequency or
    /// with a zero interval.
    pub fn new(
        title: impl Into<String>,
        payload: serde_json::Value,
        options: ScheduleOptions,
    ) -> Result<Self> {
        if options.repeat {
            if options.repeat_frequency.is_none() {
                return Err(Error::InvalidInput(
                    "repeat schedules require a repeat frequency".to_string(),
                ));
            }
            match options.repeat_interval {
                Some(n) if n > 0 => {}
                _ => {
                    return Err(Error::InvalidInput(
                        "repeat schedules require a positive repeat interval".to_string(),
                    ));
                }
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: ResourceId::new(),
            title: title.into(),
            payload,
            status: ScheduleStatus::Pending,
            priority: options.priority,
            scheduled_at: options.scheduled_at,
            next_run: options.scheduled_at,
            repeat: options.repeat,
            repeat_frequency: options.repeat_frequency,
            repeat_interval: options.repeat_interval,
            last_run: None,
            queued_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this record is due for execution at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.next_run <= now
    }

    /// Compute the run following `from` according to the recurrence rule.
    ///
    /// Monthly recurrence is calendar-aware: the day of month is preserved,
    /// clamped to the last day of shorter months.
    pub fn next_run_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let frequency = self.repeat_frequency.ok_or_else(|| {
            Error::InvalidState(format!("record {} has no repeat frequency", self.id))
        })?;
        let interval = self.repeat_interval.filter(|n| *n > 0).ok_or_else(|| {
            Error::InvalidState(format!("record {} has no repeat interval", self.id))
        })?;

        let next = match frequency {
            RepeatFrequency::Hourly => {
                from.checked_add_signed(chrono::Duration::hours(i64::from(interval)))
            }
            RepeatFrequency::Daily => from.checked_add_days(Days::new(u64::from(interval))),
            RepeatFrequency::Weekly => from.checked_add_days(Days::new(7 * u64::from(interval))),
            RepeatFrequency::Monthly => from.checked_add_months(Months::new(interval)),
        };

        next.ok_or_else(|| Error::Internal(format!("next run overflow for record {}", self.id)))
    }

    /// Move the record onto the build queue.
    ///
    /// A queued record is no longer reported as due, so the polling
    /// scheduler cannot dispatch it a second time while it waits for a
    /// queue tick.
    pub fn mark_queued(&mut self, now: DateTime<Utc>) {
        self.status = ScheduleStatus::Queued;
        self.queued_at = Some(now);
        self.touch();
    }

    /// Mark the record as picked up for execution.
    ///
    /// Only `Pending` and `Queued` records can start processing; anything
    /// else is rejected with `InvalidState`.
    pub fn begin_processing(&mut self) -> Result<()> {
        match self.status {
            ScheduleStatus::Pending | ScheduleStatus::Queued => {
                self.status = ScheduleStatus::Processing;
                self.touch();
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "record {} is {other} and cannot start processing",
                self.id
            ))),
        }
    }

    /// Record a successful execution finishing at `now`.
    ///
    /// Recurring records loop back to `Pending` with a fresh `next_run`;
    /// one-shot records become `Completed`.
    pub fn complete_run(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.last_run = Some(now);
        self.queued_at = None;
        self.error_message = None;
        if self.repeat {
            self.next_run = self.next_run_after(now)?;
            self.status = ScheduleStatus::Pending;
        } else {
            self.status = ScheduleStatus::Completed;
        }
        self.touch();
        Ok(())
    }

    /// Record a failed execution. Failed records are never rescheduled;
    /// `next_run` is left untouched so a caller can inspect what was missed.
    pub fn fail_run(&mut self, message: impl Into<String>) {
        self.status = ScheduleStatus::Failed;
        self.queued_at = None;
        self.error_message = Some(message.into());
        self.touch();
    }

    /// Cancel the schedule.
    ///
    /// Rejected with `InvalidState` while the record is `Processing`;
    /// in-flight work is never preempted.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status == ScheduleStatus::Processing {
            return Err(Error::InvalidState(format!(
                "record {} is processing and cannot be cancelled",
                self.id
            )));
        }
        self.status = ScheduleStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Re-arm a terminal record for another run at `at`.
    pub fn rearm(&mut self, at: DateTime<Utc>) {
        self.status = ScheduleStatus::Pending;
        self.next_run = at;
        self.queued_at = None;
        self.error_message = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
