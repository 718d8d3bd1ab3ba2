//! Jobs spawned by autorec rules

use std::collections::HashMap;

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::dvr::scheduler::{JobId, Scheduler};

use super::rule::RuleId;

/// Outcome of a purge
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    pub detached: usize,
    pub canceled: usize,
    pub kept: usize,
}

/// Which rule owns which recording jobs
#[derive(Default)]
pub struct SpawnLedger {
    by_rule: HashMap<RuleId, IndexSet<JobId>>,
    owners: HashMap<JobId, RuleId>,
}

impl SpawnLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rule: RuleId, job: JobId) {
        if let Some(previous) = self.owners.insert(job, rule) {
            if previous != rule {
                self.unlink(previous, job);
            }
        }
        self.by_rule.entry(rule).or_default().insert(job);
    }

    pub fn jobs(&self, rule: &RuleId) -> Vec<JobId> {
        self.by_rule
            .get(rule)
            .map(|jobs| jobs.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn owner(&self, job: JobId) -> Option<RuleId> {
        self.owners.get(&job).copied()
    }

    /// Drop a job that finished or was cancelled elsewhere
    pub fn forget_job(&mut self, job: JobId) -> Option<RuleId> {
        let rule = self.owners.remove(&job)?;
        self.unlink(rule, job);
        Some(rule)
    }

    /// Forget every job of `rule` in memory only; the scheduler keeps its
    /// link to the rule
    pub fn release(&mut self, rule: RuleId) -> usize {
        let jobs = self.by_rule.remove(&rule).unwrap_or_default();
        for job in &jobs {
            self.owners.remove(job);
        }
        jobs.len()
    }

    /// Unlink every job of `rule`.
    ///
    /// Each job is detached from the rule first. With `delete_unstarted`, jobs
    /// that have not started are cancelled and the rest are saved as they
    /// are; a running or finished recording is never cancelled.
    pub fn purge(
        &mut self,
        rule: RuleId,
        scheduler: &dyn Scheduler,
        delete_unstarted: bool,
    ) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        let jobs = self.by_rule.remove(&rule).unwrap_or_default();

        for job in jobs {
            self.owners.remove(&job);
            summary.detached += 1;

            if let Err(e) = scheduler.detach(job) {
                warn!("Failed to detach job {} from autorec {}: {:#}", job, rule, e);
            }
            if !delete_unstarted {
                continue;
            }

            match scheduler.job_status(job) {
                Ok(Some(status)) if status.is_unstarted() => match scheduler.cancel(job) {
                    Ok(()) => summary.canceled += 1,
                    Err(e) => warn!("Failed to cancel job {}: {:#}", job, e),
                },
                Ok(Some(_)) => match scheduler.save(job) {
                    Ok(()) => summary.kept += 1,
                    Err(e) => warn!("Failed to save job {}: {:#}", job, e),
                },
                Ok(None) => debug!("Job {} no longer exists", job),
                Err(e) => warn!("Failed to read status of job {}: {:#}", job, e),
            }
        }

        if summary.detached > 0 {
            debug!(
                "Purged autorec {}: {} detached, {} canceled, {} kept",
                rule, summary.detached, summary.canceled, summary.kept
            );
        }
        summary
    }

    fn unlink(&mut self, rule: RuleId, job: JobId) {
        if let Some(jobs) = self.by_rule.get_mut(&rule) {
            jobs.shift_remove(&job);
            if jobs.is_empty() {
                self.by_rule.remove(&rule);
            }
        }
    }
}
