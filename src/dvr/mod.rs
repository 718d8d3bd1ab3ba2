//! DVR (Digital Video Recorder) module
//!
//! Automatic recording rules on top of the program guide. Rules and the
//! recordings they schedule are stored in the DVR SQLite database.

pub mod autorec;
pub mod database;
pub mod models;
pub mod notify;
pub mod scheduler;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::dvr::autorec::{AutorecEngine, Collaborators};
use crate::dvr::database::DvrDatabase;
use crate::dvr::notify::AutorecNotifier;
use crate::epg::{Directory, Guide, MetadataRegistry};

/// Shared state for DVR operations
#[derive(Clone)]
pub struct DvrState {
    pub db: Arc<DvrDatabase>,
    pub engine: Arc<AutorecEngine>,
    pub notifier: Arc<AutorecNotifier>,
}

impl DvrState {
    /// Open the database at `db_path`, install logging per the stored
    /// settings and load the persisted autorec rules
    pub fn new(
        db_path: &Path,
        guide: Arc<dyn Guide>,
        directory: Arc<dyn Directory>,
        metadata: Arc<dyn MetadataRegistry>,
    ) -> anyhow::Result<Self> {
        let db = Arc::new(DvrDatabase::open(db_path)?);
        let settings = db.get_settings()?;
        init_logging(settings.debug_logging);
        info!("DVR database initialized");

        let notifier = Arc::new(AutorecNotifier::new());
        let deps = Collaborators {
            store: db.clone(),
            scheduler: db.clone(),
            guide,
            directory,
            metadata,
            notifier: notifier.clone(),
        };
        let engine = Arc::new(AutorecEngine::new(deps, settings.zone()));
        engine.load()?;

        info!("DVR system initialized successfully");
        Ok(Self { db, engine, notifier })
    }

    /// Release every rule, leaving persisted rules and their recordings in place
    pub fn stop(&self) {
        info!("Stopping DVR system...");
        self.engine.shutdown();
        info!("DVR system stopped");
    }
}

/// Initialize logging for DVR operations
///
/// When debug_logging is false, rusqlite and other verbose logs are suppressed
pub fn init_logging(debug_logging: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if debug_logging {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info,rusqlite=warn")
    };

    let subscriber = fmt()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(filter)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvr::models::AutorecRecord;
    use crate::epg::{BroadcastEvent, Episode, MemoryGuide, MemoryMetadata};

    fn guide() -> Arc<MemoryGuide> {
        let guide = Arc::new(MemoryGuide::new());
        guide.add_channel("ch1", "One", true);
        guide.add_config("default", "Default", false);
        guide.add_event(BroadcastEvent {
            id: 1,
            channel: Some("ch1".to_string()),
            start: 1_700_000_000,
            stop: 1_700_003_600,
            episode: Some(Episode::titled("Nature")),
            serieslink: None,
        });
        guide
    }

    fn open(path: &Path, guide: &Arc<MemoryGuide>) -> DvrState {
        DvrState::new(
            path,
            guide.clone(),
            guide.clone(),
            Arc::new(MemoryMetadata::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_rules_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dvr.db");
        let guide = guide();

        let state = open(&path, &guide);
        state.db.save_setting("debug_logging", "true").unwrap();
        let record = AutorecRecord {
            enabled: Some(true),
            name: Some("Nature docs".to_string()),
            title: Some("nature".to_string()),
            ..Default::default()
        };
        let id = state.engine.create(&record).unwrap();
        let jobs = state.engine.spawned_jobs(id);
        assert_eq!(jobs.len(), 1);
        state.stop();
        assert!(state.engine.is_empty());
        drop(state);

        let state = open(&path, &guide);
        let rule = state.engine.rule(id).unwrap();
        assert_eq!(rule.name, "Nature docs");
        assert_eq!(rule.title_pattern(), "nature");
        assert!(state.db.get_settings().unwrap().debug_logging);
        // The recording from the first run is still owned by the rule
        assert_eq!(state.engine.spawned_jobs(id), jobs);
        assert_eq!(state.engine.rescan_all(), 0);

        state.engine.destroy(id, true).unwrap();
        let schedule = state.db.get_schedule(jobs[0]).unwrap().unwrap();
        assert_eq!(schedule.status, crate::dvr::models::ScheduleStatus::Canceled);
        assert_eq!(schedule.autorec_id, None);
    }
}
