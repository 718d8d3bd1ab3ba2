//! EPG side of the autorec engine
//!
//! Broadcast events as seen by the matcher, plus the narrow interfaces the
//! engine uses to reach the guide, the channel/tag/config directory and the
//! reference-counted EPG metadata (brands, seasons, series links).
//! `MemoryGuide` and `MemoryMetadata` are in-process implementations of
//! those interfaces.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub type ChannelId = String;
pub type TagId = String;
pub type ConfigId = String;

/// Kind of a reference-counted EPG metadata object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Brand,
    Season,
    SeriesLink,
}

/// Handle to a brand, season or series link, identified by its URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataRef {
    pub kind: MetadataKind,
    pub uri: Arc<str>,
}

impl MetadataRef {
    pub fn new(kind: MetadataKind, uri: &str) -> Self {
        Self {
            kind,
            uri: Arc::from(uri),
        }
    }
}

impl fmt::Display for MetadataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.uri)
    }
}

/// Title text in one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LangStr {
    pub lang: String,
    pub text: String,
}

/// Episode description attached to a broadcast
#[derive(Debug, Clone, Default)]
pub struct Episode {
    pub titles: Vec<LangStr>,
    /// Content/genre codes
    pub genres: Vec<u8>,
    pub brand: Option<MetadataRef>,
    pub season: Option<MetadataRef>,
}

impl Episode {
    pub fn titled(title: &str) -> Self {
        Self {
            titles: vec![LangStr {
                lang: "eng".to_string(),
                text: title.to_string(),
            }],
            ..Default::default()
        }
    }

    /// First title variant, if any
    pub fn title(&self) -> Option<&str> {
        self.titles.first().map(|t| t.text.as_str())
    }
}

/// One scheduled program guide entry
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub id: i64,
    pub channel: Option<ChannelId>,
    pub start: i64, // Unix timestamp
    pub stop: i64,  // Unix timestamp
    pub episode: Option<Episode>,
    pub serieslink: Option<MetadataRef>,
}

impl BroadcastEvent {
    pub fn duration_secs(&self) -> f64 {
        (self.stop - self.start) as f64
    }
}

/// A channel known to the guide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub enabled: bool,
}

/// Recording configuration group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvrConfig {
    pub id: ConfigId,
    pub name: String,
    /// When set, a rule's channel must match the event's channel exactly
    pub quality_lock: bool,
}

/// Access to the current program guide.
///
/// Both methods return snapshots; the engine iterates them while holding its
/// own lock.
pub trait Guide: Send + Sync {
    fn channels(&self) -> Vec<Channel>;
    fn schedule(&self, channel: &str) -> Vec<BroadcastEvent>;
}

/// Lookup of channels, channel tags and recording configuration groups
pub trait Directory: Send + Sync {
    /// Resolve a channel by id, falling back to its name
    fn find_channel(&self, id_or_name: &str) -> Option<ChannelId>;
    /// Resolve a channel tag by id, falling back to its name
    fn find_tag(&self, id_or_name: &str) -> Option<TagId>;
    fn tag_has_channel(&self, tag: &str, channel: &str) -> bool;
    /// Resolve a config group by id, falling back to its name. An empty name
    /// resolves to the default group.
    fn find_config(&self, id_or_name: &str) -> Option<ConfigId>;
    fn default_config(&self) -> Option<ConfigId>;
    fn config(&self, id: &str) -> Option<DvrConfig>;
}

/// Reference-counted EPG metadata registry
pub trait MetadataRegistry: Send + Sync {
    /// Returns the object and whether it was newly created
    fn find_or_create(&self, kind: MetadataKind, uri: &str) -> (MetadataRef, bool);
    fn acquire(&self, object: &MetadataRef);
    fn release(&self, object: &MetadataRef);
}

#[derive(Default)]
struct GuideData {
    channels: IndexMap<ChannelId, Channel>,
    schedules: HashMap<ChannelId, Vec<BroadcastEvent>>,
    tags: IndexMap<TagId, (String, HashSet<ChannelId>)>,
    configs: IndexMap<ConfigId, DvrConfig>,
    default_config: Option<ConfigId>,
}

/// In-memory guide and directory
#[derive(Default)]
pub struct MemoryGuide {
    data: RwLock<GuideData>,
}

impl MemoryGuide {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, id: &str, name: &str, enabled: bool) {
        let mut data = self.data.write();
        data.channels.insert(
            id.to_string(),
            Channel {
                id: id.to_string(),
                name: name.to_string(),
                enabled,
            },
        );
    }

    pub fn remove_channel(&self, id: &str) {
        let mut data = self.data.write();
        data.channels.shift_remove(id);
        data.schedules.remove(id);
        for (_, members) in data.tags.values_mut() {
            members.remove(id);
        }
    }

    pub fn add_tag(&self, id: &str, name: &str, channels: &[&str]) {
        let mut data = self.data.write();
        let members = channels.iter().map(|c| c.to_string()).collect();
        data.tags.insert(id.to_string(), (name.to_string(), members));
    }

    pub fn remove_tag(&self, id: &str) {
        self.data.write().tags.shift_remove(id);
    }

    /// Add a config group; the first group added becomes the default
    pub fn add_config(&self, id: &str, name: &str, quality_lock: bool) {
        let mut data = self.data.write();
        data.configs.insert(
            id.to_string(),
            DvrConfig {
                id: id.to_string(),
                name: name.to_string(),
                quality_lock,
            },
        );
        if data.default_config.is_none() {
            data.default_config = Some(id.to_string());
        }
    }

    pub fn remove_config(&self, id: &str) {
        let mut data = self.data.write();
        data.configs.shift_remove(id);
        if data.default_config.as_deref() == Some(id) {
            data.default_config = data.configs.keys().next().cloned();
        }
    }

    /// Add an event to its channel's schedule, keeping start order
    pub fn add_event(&self, event: BroadcastEvent) {
        let Some(channel) = event.channel.clone() else {
            debug!("Ignoring event {} without channel", event.id);
            return;
        };
        let mut data = self.data.write();
        let schedule = data.schedules.entry(channel).or_default();
        let pos = schedule.partition_point(|e| e.start <= event.start);
        schedule.insert(pos, event);
    }
}

impl Guide for MemoryGuide {
    fn channels(&self) -> Vec<Channel> {
        self.data.read().channels.values().cloned().collect()
    }

    fn schedule(&self, channel: &str) -> Vec<BroadcastEvent> {
        self.data
            .read()
            .schedules
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

impl Directory for MemoryGuide {
    fn find_channel(&self, id_or_name: &str) -> Option<ChannelId> {
        let data = self.data.read();
        if data.channels.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        data.channels
            .values()
            .find(|c| c.name == id_or_name)
            .map(|c| c.id.clone())
    }

    fn find_tag(&self, id_or_name: &str) -> Option<TagId> {
        let data = self.data.read();
        if data.tags.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        data.tags
            .iter()
            .find(|(_, (name, _))| name == id_or_name)
            .map(|(id, _)| id.clone())
    }

    fn tag_has_channel(&self, tag: &str, channel: &str) -> bool {
        self.data
            .read()
            .tags
            .get(tag)
            .map(|(_, members)| members.contains(channel))
            .unwrap_or(false)
    }

    fn find_config(&self, id_or_name: &str) -> Option<ConfigId> {
        if id_or_name.is_empty() {
            return self.default_config();
        }
        let data = self.data.read();
        if data.configs.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        data.configs
            .values()
            .find(|c| c.name == id_or_name)
            .map(|c| c.id.clone())
    }

    fn default_config(&self) -> Option<ConfigId> {
        self.data.read().default_config.clone()
    }

    fn config(&self, id: &str) -> Option<DvrConfig> {
        self.data.read().configs.get(id).cloned()
    }
}

/// In-memory metadata registry tracking reference counts
#[derive(Default)]
pub struct MemoryMetadata {
    refs: Mutex<HashMap<MetadataRef, usize>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reference count, `None` if the object was never created
    pub fn refcount(&self, object: &MetadataRef) -> Option<usize> {
        self.refs.lock().get(object).copied()
    }
}

impl MetadataRegistry for MemoryMetadata {
    fn find_or_create(&self, kind: MetadataKind, uri: &str) -> (MetadataRef, bool) {
        let object = MetadataRef::new(kind, uri);
        let mut refs = self.refs.lock();
        let created = !refs.contains_key(&object);
        if created {
            refs.insert(object.clone(), 0);
        }
        (object, created)
    }

    fn acquire(&self, object: &MetadataRef) {
        *self.refs.lock().entry(object.clone()).or_insert(0) += 1;
    }

    fn release(&self, object: &MetadataRef) {
        if let Some(count) = self.refs.lock().get_mut(object) {
            *count = count.saturating_sub(1);
        }
    }
}
