//! Autorec rule definition and field assignment

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dvr::models::{
    format_time_of_day, parse_time_of_day, AutorecRecord, Priority, Weekdays,
};
use crate::epg::{ChannelId, ConfigId, Directory, MetadataKind, MetadataRef, MetadataRegistry, TagId};

use super::error::{AutorecError, Result};

pub type RuleId = Uuid;

/// Case-insensitive, unanchored title pattern
#[derive(Debug, Clone)]
pub struct TitleFilter {
    pattern: String,
    regex: Regex,
}

impl TitleFilter {
    pub fn compile(pattern: &str) -> std::result::Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// The fields the registry keeps reverse indices for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexKeys {
    pub channel: Option<ChannelId>,
    pub tag: Option<TagId>,
    pub config: Option<ConfigId>,
}

/// An automatic recording rule
#[derive(Debug, Clone)]
pub struct AutorecRule {
    pub id: RuleId,
    pub enabled: bool,
    pub name: String,
    pub directory: String,
    pub title: Option<TitleFilter>,
    pub channel: Option<ChannelId>,
    pub tag: Option<TagId>,
    /// Start window lower bound, minute of day
    pub start: Option<u16>,
    /// Start window upper bound, minute of day
    pub start_window: Option<u16>,
    pub start_extra: i64,
    pub stop_extra: i64,
    pub weekdays: Weekdays,
    /// Seconds; 0 = no minimum
    pub min_duration: i64,
    /// Seconds; 0 (or more than a day) = no maximum
    pub max_duration: i64,
    /// Genre code; 0 = any
    pub content_type: u8,
    pub priority: Priority,
    pub retention: u32,
    pub config: Option<ConfigId>,
    pub brand: Option<MetadataRef>,
    pub season: Option<MetadataRef>,
    pub serieslink: Option<MetadataRef>,
    pub owner: String,
    pub creator: String,
    pub comment: String,
}

impl AutorecRule {
    pub fn new(id: RuleId, config: Option<ConfigId>) -> Self {
        Self {
            id,
            enabled: false,
            name: String::new(),
            directory: String::new(),
            title: None,
            channel: None,
            tag: None,
            start: None,
            start_window: None,
            start_extra: 0,
            stop_extra: 0,
            weekdays: Weekdays::ALL,
            min_duration: 0,
            max_duration: 0,
            content_type: 0,
            priority: Priority::Normal,
            retention: 0,
            config,
            brand: None,
            season: None,
            serieslink: None,
            owner: String::new(),
            creator: String::new(),
            comment: String::new(),
        }
    }

    pub fn title_pattern(&self) -> &str {
        self.title.as_ref().map(|t| t.pattern()).unwrap_or("")
    }

    /// Name, else comment, else empty
    pub fn display_title(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            &self.comment
        }
    }

    pub fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            channel: self.channel.clone(),
            tag: self.tag.clone(),
            config: self.config.clone(),
        }
    }

    /// Apply the fields present in `record`, returning whether anything changed.
    ///
    /// References are resolved through `directory`; unknown ones clear the
    /// field. Metadata references are acquired/released on `metadata`. With
    /// `strict`, an uncompilable title is an error and nothing is applied;
    /// otherwise it is logged and the title filter is dropped.
    pub(crate) fn apply(
        &mut self,
        record: &AutorecRecord,
        directory: &dyn Directory,
        metadata: &dyn MetadataRegistry,
        strict: bool,
    ) -> Result<bool> {
        let title = match record.title.as_deref() {
            None => None,
            Some(pattern) if pattern == self.title_pattern() => None,
            Some("") => Some(None),
            Some(pattern) => match TitleFilter::compile(pattern) {
                Ok(filter) => Some(Some(filter)),
                Err(source) if strict => {
                    return Err(AutorecError::InvalidTitlePattern {
                        pattern: pattern.to_string(),
                        source,
                    })
                }
                Err(e) => {
                    warn!("Autorec {}: dropping invalid title pattern '{}': {}", self.id, pattern, e);
                    Some(None)
                }
            },
        };

        let mut changed = false;

        if let Some(title) = title {
            self.title = title;
            changed = true;
        }
        if let Some(v) = record.enabled {
            changed |= assign(&mut self.enabled, v);
        }
        if let Some(v) = &record.name {
            changed |= assign(&mut self.name, v.clone());
        }
        if let Some(v) = &record.directory {
            changed |= assign(&mut self.directory, v.clone());
        }
        if let Some(v) = &record.channel {
            let channel = resolve(v, "channel", |s| directory.find_channel(s));
            changed |= assign(&mut self.channel, channel);
        }
        if let Some(v) = &record.tag {
            let tag = resolve(v, "tag", |s| directory.find_tag(s));
            changed |= assign(&mut self.tag, tag);
        }
        if let Some(v) = &record.config_name {
            let config = directory.find_config(v).or_else(|| {
                warn!("Autorec {}: unknown config group '{}', using default", self.id, v);
                directory.default_config()
            });
            changed |= assign(&mut self.config, config);
        }
        if let Some(v) = &record.start {
            changed |= assign(&mut self.start, parse_time_of_day(v));
        }
        if let Some(v) = &record.start_window {
            changed |= assign(&mut self.start_window, parse_time_of_day(v));
        }
        if let Some(v) = record.start_extra {
            changed |= assign(&mut self.start_extra, v);
        }
        if let Some(v) = record.stop_extra {
            changed |= assign(&mut self.stop_extra, v);
        }
        if let Some(days) = &record.weekdays {
            changed |= assign(&mut self.weekdays, Weekdays::from_day_numbers(days));
        }
        if let Some(v) = record.minduration {
            changed |= assign(&mut self.min_duration, v);
        }
        if let Some(v) = record.maxduration {
            changed |= assign(&mut self.max_duration, v);
        }
        if let Some(v) = record.content_type {
            let content_type = u8::try_from(v).unwrap_or_else(|_| {
                warn!("Autorec {}: content type {} out of range, ignoring", self.id, v);
                0
            });
            changed |= assign(&mut self.content_type, content_type);
        }
        if let Some(v) = record.pri {
            changed |= assign(&mut self.priority, Priority::from_u32(v));
        }
        if let Some(v) = record.retention {
            changed |= assign(&mut self.retention, v);
        }
        if let Some(uri) = &record.brand {
            changed |= assign_metadata(&mut self.brand, MetadataKind::Brand, uri, metadata);
        }
        if let Some(uri) = &record.season {
            changed |= assign_metadata(&mut self.season, MetadataKind::Season, uri, metadata);
        }
        if let Some(uri) = &record.serieslink {
            changed |= assign_metadata(&mut self.serieslink, MetadataKind::SeriesLink, uri, metadata);
        }
        if let Some(v) = &record.owner {
            changed |= assign(&mut self.owner, v.clone());
        }
        if let Some(v) = &record.creator {
            changed |= assign(&mut self.creator, v.clone());
        }
        if let Some(v) = &record.comment {
            changed |= assign(&mut self.comment, v.clone());
        }

        Ok(changed)
    }

    /// Drop every metadata reference held by this rule
    pub(crate) fn release_metadata(&mut self, metadata: &dyn MetadataRegistry) {
        for slot in [&mut self.brand, &mut self.season, &mut self.serieslink] {
            if let Some(object) = slot.take() {
                metadata.release(&object);
            }
        }
    }

    /// Drop an edited copy of `original` that will not be kept, moving
    /// metadata references back to the ones `original` holds
    pub(crate) fn discard_edit(mut self, original: &AutorecRule, metadata: &dyn MetadataRegistry) {
        let slots = [
            (&mut self.brand, &original.brand),
            (&mut self.season, &original.season),
            (&mut self.serieslink, &original.serieslink),
        ];
        for (edited, kept) in slots {
            if *edited == *kept {
                continue;
            }
            if let Some(object) = edited.take() {
                metadata.release(&object);
            }
            if let Some(object) = kept {
                metadata.acquire(object);
            }
        }
    }

    /// Full persisted form of the rule
    pub fn to_record(&self) -> AutorecRecord {
        let uri = |r: &Option<MetadataRef>| Some(r.as_ref().map(|m| m.uri.to_string()).unwrap_or_default());

        AutorecRecord {
            enabled: Some(self.enabled),
            name: Some(self.name.clone()),
            directory: Some(self.directory.clone()),
            title: Some(self.title_pattern().to_string()),
            channel: Some(self.channel.clone().unwrap_or_default()),
            tag: Some(self.tag.clone().unwrap_or_default()),
            start: Some(format_time_of_day(self.start)),
            start_window: Some(format_time_of_day(self.start_window)),
            start_extra: Some(self.start_extra),
            stop_extra: Some(self.stop_extra),
            weekdays: Some(self.weekdays.day_numbers()),
            minduration: Some(self.min_duration),
            maxduration: Some(self.max_duration),
            content_type: Some(self.content_type as u32),
            pri: Some(self.priority.as_u32()),
            retention: Some(self.retention),
            config_name: Some(self.config.clone().unwrap_or_default()),
            brand: uri(&self.brand),
            season: uri(&self.season),
            serieslink: uri(&self.serieslink),
            owner: Some(self.owner.clone()),
            creator: Some(self.creator.clone()),
            comment: Some(self.comment.clone()),
        }
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn resolve(value: &str, what: &str, find: impl Fn(&str) -> Option<String>) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let found = find(value);
    if found.is_none() {
        debug!("Unknown {} '{}', clearing reference", what, value);
    }
    found
}

fn assign_metadata(
    slot: &mut Option<MetadataRef>,
    kind: MetadataKind,
    uri: &str,
    metadata: &dyn MetadataRegistry,
) -> bool {
    let object = if uri.is_empty() {
        None
    } else {
        Some(metadata.find_or_create(kind, uri).0)
    };

    if *slot == object {
        return false;
    }
    if let Some(old) = slot.take() {
        metadata.release(&old);
    }
    if let Some(new) = &object {
        metadata.acquire(new);
    }
    *slot = object;
    true
}
