//! Autorec match predicate
//!
//! Decides whether a rule wants a broadcast. Pure: the only inputs are the
//! rule, the event and a read-only view of the directory.

use chrono::{Datelike, Duration, NaiveDateTime};

use crate::dvr::models::{Zone, MINUTES_PER_DAY};
use crate::epg::{BroadcastEvent, Directory};

use super::rule::AutorecRule;

/// Maximum durations above this are treated as "no maximum"
const MAX_DURATION_LIMIT_SECS: i64 = 24 * 3600;

/// Read-only environment for matching
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub directory: &'a dyn Directory,
    pub zone: Zone,
}

/// Return true if `event` is matched by `rule`
pub fn matches(rule: &AutorecRule, event: &BroadcastEvent, ctx: &MatchContext<'_>) -> bool {
    let (Some(channel), Some(episode)) = (event.channel.as_deref(), event.episode.as_ref()) else {
        return false;
    };
    if !rule.enabled || rule.weekdays.is_empty() {
        return false;
    }

    if is_super_wildcard(rule) {
        return false;
    }

    // A series link is exact and overrides every other filter
    if let Some(serieslink) = &rule.serieslink {
        return event.serieslink.as_ref() == Some(serieslink);
    }
    if let Some(season) = &rule.season {
        if episode.season.as_ref() != Some(season) {
            return false;
        }
    }
    if let Some(brand) = &rule.brand {
        if episode.brand.as_ref() != Some(brand) {
            return false;
        }
    }
    if let Some(title) = &rule.title {
        if !episode.titles.iter().any(|t| title.is_match(&t.text)) {
            return false;
        }
    }

    // Without quality lock the rule may record the same programme elsewhere
    let Some(config) = rule.config.as_deref().and_then(|id| ctx.directory.config(id)) else {
        return false;
    };
    if config.quality_lock {
        if let Some(rule_channel) = &rule.channel {
            if rule_channel != channel {
                return false;
            }
        }
    }

    if let Some(tag) = &rule.tag {
        if !ctx.directory.tag_has_channel(tag, channel) {
            return false;
        }
    }

    if rule.content_type != 0 && !episode.genres.contains(&rule.content_type) {
        return false;
    }

    let Some(local_start) = ctx.zone.local_datetime(event.start) else {
        return false;
    };

    if !in_start_window(rule, local_start) {
        return false;
    }

    let duration = event.duration_secs();
    if rule.min_duration > 0 && duration < rule.min_duration as f64 {
        return false;
    }
    if let Some(max) = max_duration(rule) {
        if duration > max as f64 {
            return false;
        }
    }

    if !rule.weekdays.is_all()
        && !rule
            .weekdays
            .contains_day(local_start.weekday().num_days_from_monday())
    {
        return false;
    }

    true
}

/// A rule with no effective filter at all would record every broadcast
pub fn is_super_wildcard(rule: &AutorecRule) -> bool {
    rule.channel.is_none()
        && rule.tag.is_none()
        && rule.content_type == 0
        && rule.title.is_none()
        && rule.brand.is_none()
        && rule.season.is_none()
        && rule.min_duration <= 0
        && max_duration(rule).is_none()
        && rule.serieslink.is_none()
}

fn max_duration(rule: &AutorecRule) -> Option<i64> {
    (rule.max_duration > 0 && rule.max_duration <= MAX_DURATION_LIMIT_SECS).then_some(rule.max_duration)
}

fn in_start_window(rule: &AutorecRule, local_start: NaiveDateTime) -> bool {
    let (Some(lower), Some(upper)) = (rule.start, rule.start_window) else {
        return true;
    };
    if lower >= MINUTES_PER_DAY || upper >= MINUTES_PER_DAY {
        return true;
    }

    let Some(anchor) = local_start
        .date()
        .and_hms_opt((lower / 60) as u32, (lower % 60) as u32, 0)
    else {
        return false;
    };

    if lower > upper {
        // Window wraps past midnight: try the window opening the day before, then the same day
        let width = Duration::minutes((MINUTES_PER_DAY - lower + upper) as i64);
        within(anchor - Duration::days(1), width, local_start) || within(anchor, width, local_start)
    } else {
        let width = Duration::minutes((upper - lower) as i64);
        within(anchor, width, local_start)
    }
}

fn within(from: NaiveDateTime, width: Duration, t: NaiveDateTime) -> bool {
    from <= t && t <= from + width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvr::autorec::rule::TitleFilter;
    use crate::dvr::models::Weekdays;
    use crate::epg::{Episode, LangStr, MemoryGuide, MetadataKind, MetadataRef};
    use chrono::{FixedOffset, TimeZone, Utc};
    use uuid::Uuid;

    fn guide() -> MemoryGuide {
        let guide = MemoryGuide::new();
        guide.add_channel("ch1", "One", true);
        guide.add_channel("ch2", "Two", true);
        guide.add_tag("hd", "HD", &["ch1"]);
        guide.add_config("default", "Default", false);
        guide.add_config("locked", "Locked", true);
        guide
    }

    fn ctx(guide: &MemoryGuide) -> MatchContext<'_> {
        MatchContext {
            directory: guide,
            zone: Zone::Fixed(FixedOffset::east_opt(0).unwrap()),
        }
    }

    /// 2024-01-01 is a Monday
    fn ts(day: u32, hour: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 1, day, hour, min, 0).unwrap().timestamp()
    }

    fn event(channel: &str, start: i64, secs: i64) -> BroadcastEvent {
        BroadcastEvent {
            id: 1,
            channel: Some(channel.to_string()),
            start,
            stop: start + secs,
            episode: Some(Episode::titled("Evening News")),
            serieslink: None,
        }
    }

    fn rule() -> AutorecRule {
        let mut rule = AutorecRule::new(Uuid::new_v4(), Some("default".to_string()));
        rule.enabled = true;
        rule
    }

    fn titled(pattern: &str) -> AutorecRule {
        let mut rule = rule();
        rule.title = Some(TitleFilter::compile(pattern).unwrap());
        rule
    }

    #[test]
    fn test_super_wildcard_never_matches() {
        let guide = guide();
        let rule = rule();
        assert!(is_super_wildcard(&rule));
        for hour in [0, 6, 12, 18, 23] {
            assert!(!matches(&rule, &event("ch1", ts(1, hour, 0), 1800), &ctx(&guide)));
        }

        let mut huge_max = self::rule();
        huge_max.max_duration = 25 * 3600;
        assert!(is_super_wildcard(&huge_max));

        let mut min_only = self::rule();
        min_only.min_duration = 60;
        assert!(!is_super_wildcard(&min_only));
        assert!(matches(&min_only, &event("ch1", ts(1, 12, 0), 1800), &ctx(&guide)));
    }

    #[test]
    fn test_series_link_is_terminal() {
        let guide = guide();
        let link = MetadataRef::new(MetadataKind::SeriesLink, "crid://sl/1");
        let mut rule = rule();
        rule.serieslink = Some(link.clone());
        // Filters that would otherwise reject are ignored
        rule.weekdays = Weekdays::from_bits(0x01);
        rule.config = None;
        rule.min_duration = 7200;

        let mut ev = event("ch2", ts(2, 12, 0), 1800);
        assert!(!matches(&rule, &ev, &ctx(&guide)));

        ev.serieslink = Some(link);
        assert!(matches(&rule, &ev, &ctx(&guide)));

        ev.serieslink = Some(MetadataRef::new(MetadataKind::SeriesLink, "crid://sl/2"));
        assert!(!matches(&rule, &ev, &ctx(&guide)));
    }

    #[test]
    fn test_basic_rejections() {
        let guide = guide();
        let rule = titled("news");
        let ev = event("ch1", ts(1, 12, 0), 1800);
        assert!(matches(&rule, &ev, &ctx(&guide)));

        let mut no_episode = ev.clone();
        no_episode.episode = None;
        assert!(!matches(&rule, &no_episode, &ctx(&guide)));

        let mut no_channel = ev.clone();
        no_channel.channel = None;
        assert!(!matches(&rule, &no_channel, &ctx(&guide)));

        let mut disabled = rule.clone();
        disabled.enabled = false;
        assert!(!matches(&disabled, &ev, &ctx(&guide)));

        let mut no_days = rule.clone();
        no_days.weekdays = Weekdays::NONE;
        assert!(!matches(&no_days, &ev, &ctx(&guide)));

        let mut no_config = rule.clone();
        no_config.config = None;
        assert!(!matches(&no_config, &ev, &ctx(&guide)));
    }

    #[test]
    fn test_title_any_language_case_insensitive() {
        let guide = guide();
        let mut ev = event("ch1", ts(1, 12, 0), 1800);
        ev.episode = Some(Episode {
            titles: vec![
                LangStr { lang: "ger".into(), text: "Nachrichten".into() },
                LangStr { lang: "eng".into(), text: "Evening NEWS".into() },
            ],
            ..Default::default()
        });

        assert!(matches(&titled("news"), &ev, &ctx(&guide)));
        assert!(matches(&titled("nachricht"), &ev, &ctx(&guide)));
        assert!(!matches(&titled("^news"), &ev, &ctx(&guide)));
        assert!(!matches(&titled("weather"), &ev, &ctx(&guide)));

        ev.episode = Some(Episode::default());
        assert!(!matches(&titled("news"), &ev, &ctx(&guide)));
    }

    #[test]
    fn test_brand_and_season() {
        let guide = guide();
        let brand = MetadataRef::new(MetadataKind::Brand, "crid://brand/1");
        let season = MetadataRef::new(MetadataKind::Season, "crid://season/1");
        let mut rule = rule();
        rule.brand = Some(brand.clone());

        let mut ev = event("ch1", ts(1, 12, 0), 1800);
        assert!(!matches(&rule, &ev, &ctx(&guide)));
        if let Some(ep) = ev.episode.as_mut() {
            ep.brand = Some(brand);
        }
        assert!(matches(&rule, &ev, &ctx(&guide)));

        rule.season = Some(season.clone());
        assert!(!matches(&rule, &ev, &ctx(&guide)));
        if let Some(ep) = ev.episode.as_mut() {
            ep.season = Some(season);
        }
        assert!(matches(&rule, &ev, &ctx(&guide)));
    }

    #[test]
    fn test_channel_only_enforced_with_quality_lock() {
        let guide = guide();
        let mut rule = titled("news");
        rule.channel = Some("ch1".to_string());
        let other = event("ch2", ts(1, 12, 0), 1800);

        assert!(matches(&rule, &other, &ctx(&guide)));

        rule.config = Some("locked".to_string());
        assert!(!matches(&rule, &other, &ctx(&guide)));
        assert!(matches(&rule, &event("ch1", ts(1, 12, 0), 1800), &ctx(&guide)));
    }

    #[test]
    fn test_tag_and_content_type() {
        let guide = guide();
        let mut rule = rule();
        rule.tag = Some("hd".to_string());
        assert!(matches(&rule, &event("ch1", ts(1, 12, 0), 1800), &ctx(&guide)));
        assert!(!matches(&rule, &event("ch2", ts(1, 12, 0), 1800), &ctx(&guide)));

        let mut rule = self::rule();
        rule.content_type = 0x20;
        let mut ev = event("ch1", ts(1, 12, 0), 1800);
        assert!(!matches(&rule, &ev, &ctx(&guide)));
        if let Some(ep) = ev.episode.as_mut() {
            ep.genres = vec![0x10, 0x20];
        }
        assert!(matches(&rule, &ev, &ctx(&guide)));
    }

    #[test]
    fn test_start_window_wraps_midnight() {
        let guide = guide();
        let mut rule = titled("news");
        rule.start = Some(22 * 60);
        rule.start_window = Some(2 * 60);

        assert!(matches(&rule, &event("ch1", ts(2, 23, 30), 1800), &ctx(&guide)));
        assert!(matches(&rule, &event("ch1", ts(2, 1, 0), 1800), &ctx(&guide)));
        assert!(matches(&rule, &event("ch1", ts(2, 22, 0), 1800), &ctx(&guide)));
        assert!(!matches(&rule, &event("ch1", ts(2, 12, 0), 1800), &ctx(&guide)));
        assert!(!matches(&rule, &event("ch1", ts(2, 2, 1), 1800), &ctx(&guide)));
    }

    #[test]
    fn test_start_window_same_day() {
        let guide = guide();
        let mut rule = titled("news");
        rule.start = Some(20 * 60);
        rule.start_window = Some(21 * 60);

        assert!(matches(&rule, &event("ch1", ts(1, 20, 30), 1800), &ctx(&guide)));
        assert!(matches(&rule, &event("ch1", ts(1, 21, 0), 1800), &ctx(&guide)));
        assert!(!matches(&rule, &event("ch1", ts(1, 21, 30), 1800), &ctx(&guide)));
        assert!(!matches(&rule, &event("ch1", ts(1, 19, 59), 1800), &ctx(&guide)));

        // Only one bound set: no window filter
        rule.start_window = None;
        assert!(matches(&rule, &event("ch1", ts(1, 3, 0), 1800), &ctx(&guide)));
    }

    #[test]
    fn test_start_window_uses_local_time() {
        let guide = guide();
        let mut rule = titled("news");
        rule.start = Some(20 * 60);
        rule.start_window = Some(21 * 60);
        let ctx = MatchContext {
            directory: &guide,
            zone: Zone::Fixed(FixedOffset::east_opt(2 * 3600).unwrap()),
        };
        // 18:30 UTC is 20:30 at UTC+2
        assert!(matches(&rule, &event("ch1", ts(1, 18, 30), 1800), &ctx));
        assert!(!matches(&rule, &event("ch1", ts(1, 20, 30), 1800), &ctx));
    }

    #[test]
    fn test_weekday_mask() {
        let guide = guide();
        let mut rule = titled("news");
        rule.weekdays = Weekdays::from_bits(0x01);

        assert!(matches(&rule, &event("ch1", ts(1, 12, 0), 1800), &ctx(&guide)));
        for day in 2..=7 {
            assert!(!matches(&rule, &event("ch1", ts(day, 12, 0), 1800), &ctx(&guide)));
        }

        rule.weekdays = Weekdays::ALL;
        for day in 1..=7 {
            assert!(matches(&rule, &event("ch1", ts(day, 12, 0), 1800), &ctx(&guide)));
        }
    }

    #[test]
    fn test_duration_bounds() {
        let guide = guide();
        let mut rule = titled("news");
        rule.min_duration = 1800;
        rule.max_duration = 3600;
        let start = ts(1, 12, 0);

        assert!(!matches(&rule, &event("ch1", start, 1799), &ctx(&guide)));
        assert!(matches(&rule, &event("ch1", start, 1800), &ctx(&guide)));
        assert!(matches(&rule, &event("ch1", start, 3600), &ctx(&guide)));
        assert!(!matches(&rule, &event("ch1", start, 3601), &ctx(&guide)));

        // A maximum over a day means unbounded
        rule.max_duration = 48 * 3600;
        assert!(matches(&rule, &event("ch1", start, 30 * 3600), &ctx(&guide)));
    }
}
