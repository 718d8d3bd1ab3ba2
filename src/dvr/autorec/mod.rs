//! Automatic recording rules
//!
//! `AutorecEngine` owns every autorec rule and the recordings they spawned.
//! New broadcasts are matched against all rules through [`AutorecEngine::evaluate`];
//! creating or editing a rule re-scans the whole guide for that rule.
//!
//! All state sits behind a single mutex. Matching, rule mutation and
//! re-scans run under it, so collaborators must not call back into the
//! engine from inside a trait method.

mod error;
mod matcher;
mod registry;
mod rule;
mod spawns;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dvr::database::ConfigStore;
use crate::dvr::models::{AutorecRecord, Zone};
use crate::dvr::notify::Notifier;
use crate::dvr::scheduler::{JobId, Scheduler};
use crate::epg::{BroadcastEvent, Directory, Guide, MetadataKind, MetadataRegistry};

pub use error::{AutorecError, Result};
pub use matcher::{is_super_wildcard, matches, MatchContext};
pub use registry::RuleRegistry;
pub use rule::{AutorecRule, IndexKeys, RuleId, TitleFilter};
pub use spawns::{PurgeSummary, SpawnLedger};

/// Everything the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ConfigStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub guide: Arc<dyn Guide>,
    pub directory: Arc<dyn Directory>,
    pub metadata: Arc<dyn MetadataRegistry>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Default)]
struct EngineState {
    rules: RuleRegistry,
    spawns: SpawnLedger,
}

pub struct AutorecEngine {
    state: Mutex<EngineState>,
    deps: Collaborators,
    zone: Zone,
}

impl AutorecEngine {
    pub fn new(deps: Collaborators, zone: Zone) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            deps,
            zone,
        }
    }

    fn match_context(&self) -> MatchContext<'_> {
        MatchContext {
            directory: &*self.deps.directory,
            zone: self.zone,
        }
    }

    /// Load persisted rules and re-link the recordings still scheduled for
    /// them. Loading does not persist or re-scan.
    ///
    /// Records with an invalid id are skipped; bad fields are cleared.
    pub fn load(&self) -> Result<usize> {
        let records = self.deps.store.load()?;
        let mut state = self.state.lock();
        let mut loaded = 0;

        for (id, record) in records {
            let Ok(id) = Uuid::parse_str(&id) else {
                warn!("{}, skipping", AutorecError::InvalidId(id));
                continue;
            };
            if state.rules.contains(&id) {
                warn!("Duplicate autorec entry {}, skipping", id);
                continue;
            }

            let rule = match self.build_rule(id, &record, false) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!("Skipping autorec entry {}: {}", id, e);
                    continue;
                }
            };
            match self.deps.scheduler.jobs_for_rule(id) {
                Ok(jobs) => {
                    for job in jobs {
                        state.spawns.record(id, job);
                    }
                }
                Err(e) => warn!("Autorec {}: failed to read its recordings: {:#}", id, e),
            }
            self.deps.notifier.rule_added(&rule);
            state.rules.insert(rule);
            loaded += 1;
        }

        info!("Loaded {} autorec entries", loaded);
        Ok(loaded)
    }

    /// Create a rule from `record` over the defaults, persist it and scan the guide
    pub fn create(&self, record: &AutorecRecord) -> Result<RuleId> {
        let mut state = self.state.lock();
        let id = Uuid::new_v4();

        let mut rule = self.build_rule(id, record, true)?;
        if let Err(e) = self.persist(&rule) {
            rule.release_metadata(&*self.deps.metadata);
            return Err(e);
        }

        self.deps.notifier.rule_added(&rule);
        state.rules.insert(rule);
        let created = self.cascade(&mut state, id, false);

        info!("Created autorec entry {} ({} recordings scheduled)", id, created);
        Ok(id)
    }

    /// Create a rule following the series link of `event`, restricted to its
    /// title and channel
    pub fn create_series_link(
        &self,
        config_name: &str,
        event: &BroadcastEvent,
        owner: &str,
        creator: &str,
        comment: &str,
    ) -> Result<Option<RuleId>> {
        let Some(episode) = &event.episode else {
            return Ok(None);
        };

        let record = AutorecRecord {
            enabled: Some(true),
            title: Some(regex::escape(episode.title().unwrap_or_default())),
            config_name: Some(config_name.to_string()),
            channel: event.channel.clone(),
            serieslink: event.serieslink.as_ref().map(|sl| sl.uri.to_string()),
            owner: Some(owner.to_string()),
            creator: Some(creator.to_string()),
            comment: Some(comment.to_string()),
            ..Default::default()
        };

        self.create(&record).map(Some)
    }

    /// Apply a field-level edit. A change is persisted first, then the rule
    /// is reindexed and the guide re-scanned after cancelling the rule's
    /// unstarted recordings. A failed save leaves the rule as it was.
    pub fn update(&self, id: RuleId, record: &AutorecRecord) -> Result<bool> {
        let mut state = self.state.lock();
        let current = state.rules.get(&id).ok_or(AutorecError::NotFound(id))?;
        let before = current.index_keys();

        let mut edited = current.clone();
        let changed = edited.apply(record, &*self.deps.directory, &*self.deps.metadata, true)?;
        if !changed {
            return Ok(false);
        }
        if let Err(e) = self.persist(&edited) {
            edited.discard_edit(current, &*self.deps.metadata);
            return Err(e);
        }

        if let Some(rule) = state.rules.get_mut(&id) {
            *rule = edited;
        }
        state.rules.reindex(id, &before);
        let created = self.cascade(&mut state, id, true);

        debug!("Updated autorec entry {} ({} recordings scheduled)", id, created);
        Ok(true)
    }

    /// Remove a rule, cancelling its unstarted recordings
    pub fn destroy(&self, id: RuleId, delete_persisted: bool) -> Result<()> {
        let mut state = self.state.lock();
        self.destroy_locked(&mut state, id, delete_persisted, false)
    }

    /// Drop every rule from memory. Persisted records and the recordings'
    /// links to their rules are left for the next `load`.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        for id in state.rules.ids() {
            if let Err(e) = self.destroy_locked(&mut state, id, false, true) {
                warn!("Error removing autorec entry {}: {}", id, e);
            }
        }
        info!("Autorec entries released");
    }

    /// Re-scan the guide for one rule, optionally purging its recordings first.
    /// Returns the number of recordings created.
    pub fn on_rule_changed(&self, id: RuleId, purge: bool) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.rules.contains(&id) {
            return Err(AutorecError::NotFound(id));
        }
        Ok(self.cascade(&mut state, id, purge))
    }

    /// Re-scan the guide for every rule without purging
    pub fn rescan_all(&self) -> usize {
        let mut state = self.state.lock();
        state
            .rules
            .ids()
            .into_iter()
            .map(|id| self.cascade(&mut state, id, false))
            .sum()
    }

    /// Match a newly scheduled broadcast against every rule and request a
    /// recording for each match
    pub fn evaluate(&self, event: &BroadcastEvent) -> Vec<RuleId> {
        let mut state = self.state.lock();
        let ctx = self.match_context();
        let EngineState { rules, spawns } = &mut *state;

        let mut matched = Vec::new();
        for rule in rules.iter() {
            if matches(rule, event, &ctx) {
                matched.push(rule.id);
                self.spawn(spawns, rule, event);
            }
        }
        matched
    }

    /// Rules matching `event`, without scheduling anything
    pub fn matching_rules(&self, event: &BroadcastEvent) -> Vec<RuleId> {
        let state = self.state.lock();
        let ctx = self.match_context();
        state
            .rules
            .iter()
            .filter(|rule| matches(rule, event, &ctx))
            .map(|rule| rule.id)
            .collect()
    }

    /// Clear the channel of every rule using it
    pub fn on_channel_removed(&self, channel: &str, delete_persisted: bool) {
        let mut state = self.state.lock();
        let ids = state.rules.rules_for_channel(channel);
        self.migrate(&mut state, &ids, delete_persisted, |rule| rule.channel = None);
        info!("Channel {} removed, {} autorec entries updated", channel, ids.len());
    }

    /// Clear the channel tag of every rule using it
    pub fn on_tag_removed(&self, tag: &str, delete_persisted: bool) {
        let mut state = self.state.lock();
        let ids = state.rules.rules_for_tag(tag);
        self.migrate(&mut state, &ids, delete_persisted, |rule| rule.tag = None);
        info!("Channel tag {} removed, {} autorec entries updated", tag, ids.len());
    }

    /// Move every rule of a removed config group to the default group, or to
    /// no group unless `delete_persisted`
    pub fn on_group_removed(&self, group: &str, delete_persisted: bool) {
        let fallback = if delete_persisted {
            self.deps.directory.default_config().filter(|c| c != group)
        } else {
            None
        };

        let mut state = self.state.lock();
        let ids = state.rules.rules_for_config(group);
        self.migrate(&mut state, &ids, delete_persisted, |rule| {
            rule.config = fallback.clone()
        });
        info!(
            "Config group {} removed, {} autorec entries moved to {:?}",
            group,
            ids.len(),
            fallback
        );
    }

    /// Brand, season and series link changes do not re-scan; rules pick them
    /// up on the next broadcast or rule edit.
    pub fn on_metadata_changed(&self, kind: MetadataKind, uri: &str) {
        debug!("Metadata {:?} {} changed, no autorec re-scan", kind, uri);
    }

    /// Forget a recording that completed or was cancelled elsewhere
    pub fn forget_job(&self, job: JobId) -> Option<RuleId> {
        self.state.lock().spawns.forget_job(job)
    }

    pub fn rule(&self, id: RuleId) -> Option<AutorecRule> {
        self.state.lock().rules.get(&id).cloned()
    }

    pub fn rules(&self) -> Vec<AutorecRule> {
        self.state.lock().rules.iter().cloned().collect()
    }

    pub fn record(&self, id: RuleId) -> Option<AutorecRecord> {
        self.state.lock().rules.get(&id).map(|r| r.to_record())
    }

    pub fn len(&self) -> usize {
        self.state.lock().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spawned_jobs(&self, id: RuleId) -> Vec<JobId> {
        self.state.lock().spawns.jobs(&id)
    }

    pub fn rules_for_channel(&self, channel: &str) -> Vec<RuleId> {
        self.state.lock().rules.rules_for_channel(channel)
    }

    pub fn rules_for_tag(&self, tag: &str) -> Vec<RuleId> {
        self.state.lock().rules.rules_for_tag(tag)
    }

    pub fn rules_for_config(&self, config: &str) -> Vec<RuleId> {
        self.state.lock().rules.rules_for_config(config)
    }

    /// Whether a channel, tag or config group still refers to `id`
    pub fn is_indexed(&self, id: RuleId) -> bool {
        self.state.lock().rules.is_indexed(&id)
    }

    fn build_rule(&self, id: RuleId, record: &AutorecRecord, strict: bool) -> Result<AutorecRule> {
        let mut rule = AutorecRule::new(id, self.deps.directory.default_config());
        rule.apply(record, &*self.deps.directory, &*self.deps.metadata, strict)?;
        Ok(rule)
    }

    fn persist(&self, rule: &AutorecRule) -> Result<()> {
        self.deps.store.save(&rule.id.to_string(), &rule.to_record())?;
        Ok(())
    }

    fn spawn(&self, spawns: &mut SpawnLedger, rule: &AutorecRule, event: &BroadcastEvent) -> bool {
        match self.deps.scheduler.create_job(event, rule) {
            Ok(Some(job)) => {
                spawns.record(rule.id, job);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Autorec {}: failed to schedule event {}: {:#}", rule.id, event.id, e);
                false
            }
        }
    }

    /// Full guide scan for one rule
    fn cascade(&self, state: &mut EngineState, id: RuleId, purge: bool) -> usize {
        if purge {
            state.spawns.purge(id, &*self.deps.scheduler, true);
        }
        let Some(rule) = state.rules.get(&id) else {
            return 0;
        };

        let ctx = self.match_context();
        let mut created = 0;
        for channel in self.deps.guide.channels() {
            if !channel.enabled {
                continue;
            }
            for event in self.deps.guide.schedule(&channel.id) {
                if matches(rule, &event, &ctx) && self.spawn(&mut state.spawns, rule, &event) {
                    created += 1;
                }
            }
        }

        self.deps.notifier.rule_updated(rule);
        created
    }

    fn migrate(
        &self,
        state: &mut EngineState,
        ids: &[RuleId],
        save: bool,
        update: impl Fn(&mut AutorecRule),
    ) {
        for id in ids {
            let Some(rule) = state.rules.get_mut(id) else {
                continue;
            };
            let before = rule.index_keys();
            update(rule);
            state.rules.reindex(*id, &before);

            let Some(rule) = state.rules.get(id) else {
                continue;
            };
            if save {
                if let Err(e) = self.persist(rule) {
                    warn!("Failed to save autorec entry {}: {}", id, e);
                }
            }
            self.deps.notifier.rule_updated(rule);
        }
    }

    fn destroy_locked(
        &self,
        state: &mut EngineState,
        id: RuleId,
        delete_persisted: bool,
        keep_jobs: bool,
    ) -> Result<()> {
        if !state.rules.contains(&id) {
            return Err(AutorecError::NotFound(id));
        }

        if keep_jobs {
            state.spawns.release(id);
        } else {
            state.spawns.purge(id, &*self.deps.scheduler, true);
        }

        let deleted = if delete_persisted {
            self.deps.store.delete(&id.to_string())
        } else {
            Ok(())
        };

        if let Some(mut rule) = state.rules.remove(&id) {
            rule.release_metadata(&*self.deps.metadata);
            self.deps.notifier.rule_removed(&rule);
        }
        debug!("Removed autorec entry {}", id);

        deleted.map_err(AutorecError::from)
    }
}
