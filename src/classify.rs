use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::clock::Clock;
use crate::surface::{ElementHandle, Surface, SurfaceError, SurfaceResult};

// Item container selectors, most specific first. The first one that matches
// anything wins for the whole pass.
pub const ITEM_SELECTORS: &[&str] = &[
    r#"[data-testid="tweet"]"#,
    r#"article[data-testid="tweet"]"#,
    r#"[data-testid="cellInnerDiv"] article"#,
];

pub const PERMALINK_SELECTOR: &str = r#"a[href*="/status/"]"#;

const TEXT_SELECTORS: &[&str] = &[r#"[data-testid="tweetText"]"#, "[lang]", "span[dir]"];
const AUTHOR_LINK_SELECTOR: &str = r#"[data-testid="User-Name"] a[href^="/"]"#;
const PROFILE_LINK_SELECTOR: &str = r#"a[href^="/"]"#;

pub const EXCERPT_CHARS: usize = 100;

const RESERVED_ROUTES: &[&str] = &[
    "home",
    "notifications",
    "messages",
    "explore",
    "search",
    "i",
    "settings",
    "compose",
    "topics",
    "lists",
    "bookmarks",
    "tos",
    "privacy",
    "login",
    "signup",
];

static PERMALINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/status/(\d+)").expect("valid permalink regex"));
static HANDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("valid handle regex"));
static AUTHOR_HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([A-Za-z0-9_]{1,15})(?:[/?#].*|$)").expect("valid author href regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Original,
    Reply,
    Quote,
    Reshare,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Original,
        ItemKind::Reply,
        ItemKind::Quote,
        ItemKind::Reshare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Original => "original",
            ItemKind::Reply => "reply",
            ItemKind::Quote => "quote",
            ItemKind::Reshare => "reshare",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "original" | "post" | "tweet" => Some(ItemKind::Original),
            "reply" => Some(ItemKind::Reply),
            "quote" => Some(ItemKind::Quote),
            "reshare" | "repost" | "retweet" => Some(ItemKind::Reshare),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Permalink,
    ContentHash,
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub key: String,
    pub source: IdentitySource,
}

impl Identity {
    pub fn permalink(id: impl Into<String>) -> Self {
        Self {
            key: id.into(),
            source: IdentitySource::Permalink,
        }
    }

    pub fn is_post_number(&self) -> bool {
        is_post_number(&self.key)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

pub fn is_post_number(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

// One enumerated feed item. `element` is only a hint: it may be stale by the
// time anything acts on the item, see `crate::locate::Locator`.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub identity: Identity,
    pub kind: ItemKind,
    pub timestamp: DateTime<Utc>,
    pub excerpt: String,
    pub element: ElementHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Phrase(String),
    Marker(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRule {
    pub signal: Signal,
    pub kind: ItemKind,
}

impl KindRule {
    pub fn phrase(kind: ItemKind, phrase: &str) -> Self {
        Self {
            signal: Signal::Phrase(phrase.to_string()),
            kind,
        }
    }

    pub fn marker(kind: ItemKind, selector: &str) -> Self {
        Self {
            signal: Signal::Marker(selector.to_string()),
            kind,
        }
    }
}

// Ordered kind rules. The first rule whose signal fires decides the kind;
// nothing firing means `ItemKind::Original`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<KindRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<KindRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[KindRule] {
        &self.rules
    }

    pub fn classify(&self, text: &str, mut has_marker: impl FnMut(&str) -> bool) -> ItemKind {
        for rule in &self.rules {
            if Self::fires(&rule.signal, text, &mut has_marker) {
                debug!(kind = %rule.kind, signal = ?rule.signal, "kind rule matched");
                return rule.kind;
            }
        }
        ItemKind::Original
    }

    pub fn signals_kind(
        &self,
        kind: ItemKind,
        text: &str,
        mut has_marker: impl FnMut(&str) -> bool,
    ) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.kind == kind)
            .any(|rule| Self::fires(&rule.signal, text, &mut has_marker))
    }

    fn fires(signal: &Signal, text: &str, has_marker: &mut impl FnMut(&str) -> bool) -> bool {
        match signal {
            Signal::Phrase(phrase) => text.contains(phrase.as_str()),
            Signal::Marker(selector) => has_marker(selector),
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        use ItemKind::*;

        let mut rules = Vec::new();
        for phrase in [
            "You reposted",
            "You Retweeted",
            "你转推了",
            "你转发了",
            "你已转帖",
            "reposted",
        ] {
            rules.push(KindRule::phrase(Reshare, phrase));
        }
        for phrase in ["回复", "Replying to", "你回复了", "你已回复"] {
            rules.push(KindRule::phrase(Reply, phrase));
        }
        rules.push(KindRule::marker(Reply, r#"[data-testid="reply"]"#));
        rules.push(KindRule::marker(Quote, r#"[data-testid="quoteTweet"]"#));
        for phrase in ["引用", "Quote", "Quoted post", "引用推文"] {
            rules.push(KindRule::phrase(Quote, phrase));
        }
        Self::new(rules)
    }
}

pub struct Classifier {
    surface: Arc<dyn Surface>,
    clock: Arc<dyn Clock>,
    rules: RuleTable,
}

impl Classifier {
    pub fn new(surface: Arc<dyn Surface>, clock: Arc<dyn Clock>) -> Self {
        Self {
            surface,
            clock,
            rules: RuleTable::default(),
        }
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn surface(&self) -> &dyn Surface {
        self.surface.as_ref()
    }

    pub fn enumerate(&self) -> Vec<FeedItem> {
        match self.try_enumerate() {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "enumerating feed items failed");
                Vec::new()
            }
        }
    }

    pub fn try_enumerate(&self) -> SurfaceResult<Vec<FeedItem>> {
        Ok(self
            .candidates()?
            .into_iter()
            .filter_map(|element| self.describe(element))
            .collect())
    }

    pub fn candidates(&self) -> SurfaceResult<Vec<ElementHandle>> {
        let mut items = Vec::new();
        for selector in ITEM_SELECTORS {
            let found = self.surface.query_all(selector)?;
            if !found.is_empty() {
                debug!(selector = *selector, count = found.len(), "feed items found");
                items = found;
                break;
            }
        }

        if let Some(handle) = self.profile_scope()? {
            let before = items.len();
            items.retain(|element| {
                self.author_handle(*element).as_deref() == Some(handle.as_str())
                    || self.is_reshare(*element)
            });
            if items.len() != before {
                debug!(profile = %handle, kept = items.len(), of = before, "filtered to profile owner");
            }
        }

        Ok(items)
    }

    pub fn profile_scope(&self) -> SurfaceResult<Option<String>> {
        Ok(profile_handle(&self.surface.location()?))
    }

    pub fn describe(&self, element: ElementHandle) -> Option<FeedItem> {
        match self.surface.text_content(element) {
            Err(SurfaceError::Detached) => {
                debug!("item detached during enumeration");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "reading item failed");
                return None;
            }
            Ok(_) => {}
        }

        Some(FeedItem {
            identity: self.resolve_identity(element),
            kind: self.classify(element),
            timestamp: self.resolve_timestamp(element),
            excerpt: self.resolve_excerpt(element),
            element,
        })
    }

    pub fn classify(&self, element: ElementHandle) -> ItemKind {
        let text = self.surface.text_content(element).unwrap_or_default();
        self.rules
            .classify(&text, |selector| self.has_marker(element, selector))
    }

    pub fn is_reshare(&self, element: ElementHandle) -> bool {
        let text = self.surface.text_content(element).unwrap_or_default();
        self.rules
            .signals_kind(ItemKind::Reshare, &text, |selector| {
                self.has_marker(element, selector)
            })
    }

    pub fn resolve_identity(&self, element: ElementHandle) -> Identity {
        match self.permalink_id(element) {
            Ok(Some(id)) => return Identity::permalink(id),
            Ok(None) => {}
            Err(err) => {
                debug!(error = %err, "permalink lookup failed");
                return random_identity();
            }
        }

        match self.content_identity(element) {
            Ok(key) => Identity {
                key,
                source: IdentitySource::ContentHash,
            },
            Err(err) => {
                debug!(error = %err, "content identity failed");
                random_identity()
            }
        }
    }

    pub fn permalink_id(&self, element: ElementHandle) -> SurfaceResult<Option<String>> {
        for link in self.surface.query_within(element, PERMALINK_SELECTOR)? {
            if let Some(href) = self.surface.attribute(link, "href")? {
                if let Some(id) = post_number_from_href(&href) {
                    return Ok(Some(id));
                }
            }
        }
        Ok(None)
    }

    pub fn permalink_ids(&self, element: ElementHandle) -> SurfaceResult<Vec<String>> {
        let mut ids = Vec::new();
        for link in self.surface.query_within(element, PERMALINK_SELECTOR)? {
            if let Some(id) = self
                .surface
                .attribute(link, "href")?
                .as_deref()
                .and_then(post_number_from_href)
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    // Only the text region: the container also holds the relative time
    // label, which changes as the run goes on.
    fn content_identity(&self, element: ElementHandle) -> SurfaceResult<String> {
        let mut text = match self.surface.query_first_of(element, TEXT_SELECTORS)? {
            Some(region) => self.surface.text_content(region)?,
            None => String::new(),
        };
        if text.trim().is_empty() {
            text = self.surface.text_content(element)?;
        }
        let position = self.surface.sibling_position(element)?;
        Ok(content_key(&text, position))
    }

    pub fn resolve_timestamp(&self, element: ElementHandle) -> DateTime<Utc> {
        let now = self.clock.now();
        match self.timestamp_of(element, now) {
            Ok(Some(ts)) => ts,
            Ok(None) => now,
            Err(err) => {
                debug!(error = %err, "timestamp lookup failed");
                now
            }
        }
    }

    fn timestamp_of(
        &self,
        element: ElementHandle,
        now: DateTime<Utc>,
    ) -> SurfaceResult<Option<DateTime<Utc>>> {
        if let Some(time) = self.surface.query_first_within(element, "time")? {
            if let Some(raw) = self.surface.attribute(time, "datetime")? {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(raw.trim()) {
                    return Ok(Some(parsed.with_timezone(&Utc)));
                }
            }
        }

        for link in self.surface.query_within(element, PERMALINK_SELECTOR)? {
            let label = self.surface.text_content(link)?;
            let label = label.trim();
            if !label.is_empty() {
                return Ok(Some(parse_relative_time(label, now)));
            }
        }

        Ok(None)
    }

    pub fn resolve_excerpt(&self, element: ElementHandle) -> String {
        let text = match self.surface.query_first_of(element, TEXT_SELECTORS) {
            Ok(Some(region)) => self.surface.text_content(region),
            Ok(None) => self.surface.text_content(element),
            Err(err) => Err(err),
        };
        match text {
            Ok(text) => truncate_chars(&text, EXCERPT_CHARS),
            Err(err) => {
                debug!(error = %err, "excerpt lookup failed");
                String::new()
            }
        }
    }

    pub fn author_handle(&self, element: ElementHandle) -> Option<String> {
        let links = match self.surface.query_within(element, AUTHOR_LINK_SELECTOR) {
            Ok(links) if !links.is_empty() => links,
            _ => self
                .surface
                .query_within(element, PROFILE_LINK_SELECTOR)
                .ok()?,
        };
        links.into_iter().find_map(|link| {
            self.surface
                .attribute(link, "href")
                .ok()
                .flatten()
                .and_then(|href| author_from_href(&href))
        })
    }

    fn has_marker(&self, element: ElementHandle, selector: &str) -> bool {
        matches!(self.surface.query_first_within(element, selector), Ok(Some(_)))
    }
}

pub fn post_number_from_href(href: &str) -> Option<String> {
    PERMALINK_RE
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn profile_handle(location: &str) -> Option<String> {
    let path = match Url::parse(location) {
        Ok(url) => url.path().to_string(),
        Err(_) => location.to_string(),
    };
    let first = path.split('/').find(|segment| !segment.is_empty())?;
    if RESERVED_ROUTES.contains(&first) {
        return None;
    }
    HANDLE_RE
        .is_match(first)
        .then(|| first.to_ascii_lowercase())
}

pub fn author_from_href(href: &str) -> Option<String> {
    AUTHOR_HREF_RE
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn content_key(text: &str, position: Option<usize>) -> String {
    let head: String = text
        .chars()
        .take(EXCERPT_CHARS)
        .filter(|c| !c.is_whitespace())
        .collect();
    let digest = Sha256::digest(head.as_bytes());
    let hash = hex::encode(&digest[..8]);
    match position {
        Some(position) => format!("c{hash}_{position}"),
        None => format!("c{hash}_x"),
    }
}

fn random_identity() -> Identity {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    Identity {
        key: format!("fallback_{}", token.to_ascii_lowercase()),
        source: IdentitySource::Random,
    }
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

const MAX_LOOKBACK_SECS: i64 = 100 * 366 * 86_400;

static RELATIVE_UNITS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    [
        (r"(\d+)\s*(?:分钟|分鐘|minutes?|mins?)|(\d+)m\b", 60),
        (r"(\d+)\s*(?:小时|小時|hours?|hrs?)|(\d+)h\b", 3_600),
        (r"(\d+)\s*(?:天|days?)|(\d+)d\b", 86_400),
        (r"(\d+)\s*(?:秒|seconds?|secs?)|(\d+)s\b", 1),
    ]
    .into_iter()
    .map(|(pattern, secs)| (Regex::new(pattern).expect("valid relative time regex"), secs))
    .collect()
});

static CJK_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\d{4})年)?(\d{1,2})月(\d{1,2})日").expect("valid cjk date regex")
});
static EN_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+(\d{1,2})(?:,\s*(\d{4}))?",
    )
    .expect("valid english date regex")
});

pub fn parse_relative_time(label: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    for (pattern, unit_secs) in RELATIVE_UNITS.iter() {
        if let Some(caps) = pattern.captures(label) {
            if let Some(ts) = first_number(&caps)
                .and_then(|n| n.checked_mul(*unit_secs))
                .filter(|secs| *secs <= MAX_LOOKBACK_SECS)
                .and_then(|secs| now.checked_sub_signed(ChronoDuration::seconds(secs)))
            {
                return ts;
            }
            return now;
        }
    }

    if let Some(caps) = CJK_DATE_RE.captures(label) {
        let year = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or_else(|| now.year());
        let month = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let day = caps.get(3).and_then(|m| m.as_str().parse().ok());
        return month
            .zip(day)
            .and_then(|(month, day)| midnight(year, month, day))
            .unwrap_or(now);
    }

    if let Some(caps) = EN_DATE_RE.captures(label) {
        let year = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or_else(|| now.year());
        let month = caps.get(1).and_then(|m| month_number(m.as_str()));
        let day = caps.get(2).and_then(|m| m.as_str().parse().ok());
        return month
            .zip(day)
            .and_then(|(month, day)| midnight(year, month, day))
            .unwrap_or(now);
    }

    now
}

fn first_number(caps: &Captures<'_>) -> Option<i64> {
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .and_then(|m| m.as_str().parse().ok())
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS
        .iter()
        .position(|m| *m == abbrev)
        .map(|idx| idx as u32 + 1)
}

fn midnight(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn abbreviated_relative_units() {
        assert_eq!(parse_relative_time("3h", now()), now() - ChronoDuration::hours(3));
        assert_eq!(parse_relative_time("45m", now()), now() - ChronoDuration::minutes(45));
        assert_eq!(parse_relative_time("2d", now()), now() - ChronoDuration::days(2));
        assert_eq!(parse_relative_time("30s", now()), now() - ChronoDuration::seconds(30));
    }

    #[test]
    fn localized_relative_units() {
        assert_eq!(parse_relative_time("5 分钟", now()), now() - ChronoDuration::minutes(5));
        assert_eq!(parse_relative_time("2小时", now()), now() - ChronoDuration::hours(2));
        assert_eq!(parse_relative_time("3天", now()), now() - ChronoDuration::days(3));
        assert_eq!(
            parse_relative_time("12 minutes ago", now()),
            now() - ChronoDuration::minutes(12)
        );
        assert_eq!(parse_relative_time("1 day ago", now()), now() - ChronoDuration::days(1));
    }

    #[test]
    fn month_day_forms_use_current_year() {
        let expected = Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap();
        assert_eq!(parse_relative_time("5月10日", now()), expected);
        assert_eq!(parse_relative_time("May 10", now()), expected);

        let with_year = Utc.with_ymd_and_hms(2023, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(parse_relative_time("Mar 5, 2023", now()), with_year);
        assert_eq!(parse_relative_time("2023年3月5日", now()), with_year);
    }

    #[test]
    fn unparseable_labels_fall_back_to_now() {
        assert_eq!(parse_relative_time("yesterday-ish", now()), now());
        assert_eq!(parse_relative_time("Feb 30", now()), now());
        assert_eq!(parse_relative_time("99999999999999d", now()), now());
    }

    #[test]
    fn reshare_outranks_reply() {
        let rules = RuleTable::default();
        let text = "You reposted Replying to @someone hello";
        assert_eq!(rules.classify(text, |_| false), ItemKind::Reshare);
    }

    #[test]
    fn quote_marker_outranks_quote_phrases_and_reply_outranks_quote() {
        let rules = RuleTable::default();
        let quote_marker = r#"[data-testid="quoteTweet"]"#;
        assert_eq!(
            rules.classify("plain text", |sel| sel == quote_marker),
            ItemKind::Quote
        );
        assert_eq!(
            rules.classify("Replying to @a Quote", |sel| sel == quote_marker),
            ItemKind::Reply
        );
        assert_eq!(rules.classify("just words", |_| false), ItemKind::Original);
    }

    #[test]
    fn rule_table_is_data_driven() {
        let mut rules = vec![KindRule::phrase(ItemKind::Reshare, "a partagé")];
        rules.extend(RuleTable::default().rules().iter().cloned());
        let table = RuleTable::new(rules);
        assert_eq!(table.classify("Vous avez a partagé", |_| false), ItemKind::Reshare);
    }

    #[test]
    fn profile_scope_rejects_reserved_routes() {
        assert_eq!(profile_handle("https://x.com/Alice_01"), Some("alice_01".into()));
        assert_eq!(profile_handle("https://x.com/alice/with_replies"), Some("alice".into()));
        assert_eq!(profile_handle("https://x.com/home"), None);
        assert_eq!(profile_handle("https://x.com/i/bookmarks"), None);
        assert_eq!(profile_handle("https://x.com/"), None);
        assert_eq!(profile_handle("/this_handle_is_far_too_long"), None);
    }

    #[test]
    fn author_and_permalink_extraction() {
        assert_eq!(author_from_href("/Bob"), Some("bob".into()));
        assert_eq!(author_from_href("/bob/status/12"), Some("bob".into()));
        assert_eq!(author_from_href("https://x.com/bob"), None);
        assert_eq!(post_number_from_href("/bob/status/1234?s=20"), Some("1234".into()));
        assert_eq!(post_number_from_href("/bob/likes"), None);
    }

    #[test]
    fn content_keys_depend_on_text_and_position() {
        let a = content_key("hello   world", Some(2));
        assert_eq!(a, content_key("helloworld", Some(2)));
        assert_ne!(a, content_key("helloworld", Some(3)));
        assert!(a.starts_with('c'));
        assert!(random_identity().key.starts_with("fallback_"));
    }

    #[test]
    fn kind_names_round_trip_through_parse() {
        for kind in ItemKind::ALL {
            assert_eq!(ItemKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ItemKind::parse("Retweet"), Some(ItemKind::Reshare));
        assert_eq!(ItemKind::parse("tweet"), Some(ItemKind::Original));
        assert_eq!(ItemKind::parse("story"), None);
    }
}
