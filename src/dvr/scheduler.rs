//! Recording scheduler interface
//!
//! The autorec engine only asks the scheduler to create, cancel, detach and
//! persist jobs. `DvrDatabase` implements it on top of the `dvr_schedules`
//! table; the recorder picks scheduled rows up from there.

use anyhow::Result;
use tracing::{debug, info};

use crate::dvr::autorec::{AutorecRule, RuleId};
use crate::dvr::database::DvrDatabase;
use crate::dvr::models::{AutorecSettings, ScheduleRequest, ScheduleStatus};
use crate::epg::BroadcastEvent;

pub type JobId = i64;

pub trait Scheduler: Send + Sync {
    /// Create a pending recording for `event` on behalf of `rule`.
    ///
    /// Returns `None` when the scheduler already has a recording for the
    /// broadcast.
    fn create_job(&self, event: &BroadcastEvent, rule: &AutorecRule) -> Result<Option<JobId>>;

    /// `None` if the job no longer exists
    fn job_status(&self, job: JobId) -> Result<Option<ScheduleStatus>>;

    /// Drop the job's link to its autorec rule
    fn detach(&self, job: JobId) -> Result<()>;

    fn cancel(&self, job: JobId) -> Result<()>;

    /// Persist the job as it is
    fn save(&self, job: JobId) -> Result<()>;

    /// Scheduled or running jobs still linked to `rule`
    fn jobs_for_rule(&self, rule: RuleId) -> Result<Vec<JobId>>;
}

impl ScheduleRequest {
    /// Build the request for an autorec match. Zero paddings fall back to the
    /// configured defaults.
    pub fn for_autorec(event: &BroadcastEvent, rule: &AutorecRule, settings: &AutorecSettings) -> Self {
        let padding = |extra: i64, default: i32| {
            if extra > 0 {
                i32::try_from(extra).unwrap_or(default)
            } else {
                default
            }
        };

        Self {
            autorec_id: Some(rule.id.to_string()),
            event_id: event.id,
            channel_id: event.channel.clone().unwrap_or_default(),
            program_title: event
                .episode
                .as_ref()
                .and_then(|ep| ep.title())
                .unwrap_or_default()
                .to_string(),
            scheduled_start: event.start,
            scheduled_end: event.stop,
            start_padding_sec: padding(rule.start_extra, settings.default_start_padding_sec),
            end_padding_sec: padding(rule.stop_extra, settings.default_end_padding_sec),
            priority: rule.priority,
            retention_days: rule.retention as i32,
            directory: (!rule.directory.is_empty()).then(|| rule.directory.clone()),
        }
    }
}

impl Scheduler for DvrDatabase {
    fn create_job(&self, event: &BroadcastEvent, rule: &AutorecRule) -> Result<Option<JobId>> {
        let channel = event.channel.as_deref().unwrap_or_default();
        if let Some(existing) = self.find_schedule_for_event(event.id, channel)? {
            debug!(
                "Event {} on {} already scheduled as {}, skipping",
                event.id, channel, existing
            );
            return Ok(None);
        }

        let settings = self.get_settings()?;
        let request = ScheduleRequest::for_autorec(event, rule, &settings);
        let id = self.add_schedule(&request)?;

        info!(
            "Autorec {} scheduled '{}' on {} (schedule {})",
            rule.id, request.program_title, request.channel_id, id
        );
        Ok(Some(id))
    }

    fn job_status(&self, job: JobId) -> Result<Option<ScheduleStatus>> {
        Ok(self.get_schedule(job)?.map(|s| s.status))
    }

    fn detach(&self, job: JobId) -> Result<()> {
        self.set_schedule_autorec(job, None)
    }

    fn cancel(&self, job: JobId) -> Result<()> {
        self.cancel_schedule(job)
    }

    fn save(&self, job: JobId) -> Result<()> {
        self.touch_schedule(job)
    }

    fn jobs_for_rule(&self, rule: RuleId) -> Result<Vec<JobId>> {
        self.get_active_autorec_jobs(&rule.to_string())
    }
}
