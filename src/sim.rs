use std::collections::HashMap;
use std::fs;
use std::iter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::classify::{profile_handle, ItemKind};
use crate::surface::{ElementHandle, Surface, SurfaceError, SurfaceResult};

pub const ITEM_HEIGHT: f64 = 600.0;
pub const VIEWPORT_HEIGHT: f64 = 900.0;
const OVERSCAN: f64 = 1800.0;
const ACTION_BAR_OFFSET: f64 = 520.0;
const OVERLAY_OFFSET: f64 = 200.0;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read fixture {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    NoActions,
    NoDeleteOption,
    NoConfirm,
    // The confirmation sheet has no dedicated confirm control, only a
    // plain button labelled "Delete".
    PlainConfirm,
    NoUndoOption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimPost {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: ItemKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub fault: Option<Fault>,
    #[serde(default)]
    pub echo: bool,
}

fn default_kind() -> ItemKind {
    ItemKind::Original
}

impl SimPost {
    pub fn new(id: impl Into<String>, kind: ItemKind, posted_at: DateTime<Utc>) -> Self {
        Self {
            id: Some(id.into()),
            author: None,
            kind,
            text: String::new(),
            posted_at: Some(posted_at),
            label: None,
            reply_to: None,
            fault: None,
            echo: false,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self.posted_at = None;
        self
    }

    pub fn without_id(mut self) -> Self {
        self.id = None;
        self
    }

    pub fn echoed(mut self) -> Self {
        self.echo = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedFixture {
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub posts: Vec<SimPost>,
}

fn default_location() -> String {
    "https://x.com/me".to_string()
}

fn default_page_size() -> usize {
    3
}

impl FeedFixture {
    pub fn new(location: impl Into<String>, posts: Vec<SimPost>) -> Self {
        Self {
            location: location.into(),
            page_size: default_page_size(),
            posts,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn load(path: &Path) -> Result<Self, SimError> {
        let data = fs::read_to_string(path).map_err(|source| SimError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, SimError> {
        Ok(serde_yaml::from_str(data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Overlay {
    None,
    OverflowMenu(String),
    ReshareMenu(String),
    ConfirmSheet(String),
}

#[derive(Debug)]
struct Slot {
    key: String,
    post: SimPost,
    removed: bool,
}

#[derive(Debug)]
struct SimState {
    location: String,
    owner: String,
    slots: Vec<Slot>,
    loaded: usize,
    page_size: usize,
    scroll_top: f64,
    overlay: Overlay,
    html: String,
    generation: u32,
    attempts: HashMap<String, u32>,
    removed: Vec<String>,
    offline: bool,
}

pub struct SimFeed {
    state: Mutex<SimState>,
}

impl SimFeed {
    pub fn new(fixture: FeedFixture) -> Self {
        let owner = profile_handle(&fixture.location).unwrap_or_else(|| "me".to_string());
        let page_size = fixture.page_size.max(1);
        let slots: Vec<Slot> = fixture
            .posts
            .into_iter()
            .enumerate()
            .map(|(index, post)| Slot {
                key: post.id.clone().unwrap_or_else(|| format!("post-{index}")),
                post,
                removed: false,
            })
            .collect();
        let mut state = SimState {
            location: fixture.location,
            owner,
            loaded: page_size.min(slots.len()),
            slots,
            page_size,
            scroll_top: 0.0,
            overlay: Overlay::None,
            html: String::new(),
            generation: 0,
            attempts: HashMap::new(),
            removed: Vec::new(),
            offline: false,
        };
        state.rerender();
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.state.lock().attempts.get(key).copied().unwrap_or(0)
    }

    pub fn attempt_counts(&self) -> HashMap<String, u32> {
        self.state.lock().attempts.clone()
    }

    pub fn remaining(&self) -> Vec<String> {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| !slot.removed)
            .map(|slot| slot.key.clone())
            .collect()
    }

    pub fn loaded(&self) -> usize {
        self.state.lock().loaded
    }

    pub fn overlay_open(&self) -> bool {
        self.state.lock().overlay != Overlay::None
    }

    pub fn scroll_top(&self) -> f64 {
        self.state.lock().scroll_top
    }

    pub fn generation(&self) -> u32 {
        self.state.lock().generation
    }

    pub fn html(&self) -> String {
        self.state.lock().html.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    fn read<T>(&self, f: impl FnOnce(&SimState, &Doc) -> SurfaceResult<T>) -> SurfaceResult<T> {
        let state = self.state.lock();
        state.check_online()?;
        let doc = Doc::parse(&state.html, state.generation);
        f(&state, &doc)
    }
}

impl SimState {
    fn check_online(&self) -> SurfaceResult<()> {
        if self.offline {
            return Err(SurfaceError::Unavailable("feed offline".into()));
        }
        Ok(())
    }

    fn live(&self) -> Vec<usize> {
        (0..self.loaded)
            .filter(|index| !self.slots[*index].removed)
            .collect()
    }

    fn scroll_height(&self) -> f64 {
        (self.live().len() as f64 * ITEM_HEIGHT).max(VIEWPORT_HEIGHT)
    }

    fn max_scroll(&self) -> f64 {
        self.scroll_height() - VIEWPORT_HEIGHT
    }

    fn at_bottom(&self) -> bool {
        self.scroll_top + VIEWPORT_HEIGHT >= self.scroll_height() - 1.0
    }

    fn slot(&self, key: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.key == key)
    }

    fn fault(&self, key: &str) -> Option<Fault> {
        self.slot(key).and_then(|slot| slot.post.fault)
    }

    fn rerender(&mut self) {
        let html = self.render();
        if html != self.html {
            self.html = html;
            self.generation = self.generation.wrapping_add(1);
        }
    }

    fn render(&self) -> String {
        let low = self.scroll_top - OVERSCAN;
        let high = self.scroll_top + VIEWPORT_HEIGHT + OVERSCAN;

        let mut html = String::from(
            r#"<!DOCTYPE html><html><head><title>Feed</title></head><body><main role="main"><section aria-label="Timeline">"#,
        );
        for (position, index) in self.live().into_iter().enumerate() {
            let top = position as f64 * ITEM_HEIGHT;
            if top + ITEM_HEIGHT <= low || top >= high {
                continue;
            }
            let slot = &self.slots[index];
            let cell = self.render_post(position, slot);
            html.push_str(&cell);
            if slot.post.echo {
                html.push_str(&cell);
            }
        }
        html.push_str("</section></main>");
        html.push_str(&self.render_overlay());
        html.push_str("</body></html>");
        html
    }

    fn render_post(&self, position: usize, slot: &Slot) -> String {
        let post = &slot.post;
        let author = escape(post.author.as_deref().unwrap_or(&self.owner));

        let label = escape(&match (&post.label, &post.posted_at) {
            (Some(label), _) => label.clone(),
            (None, Some(at)) => at.format("%b %-d, %Y").to_string(),
            (None, None) => String::new(),
        });
        let time = match &post.posted_at {
            Some(at) => format!(r#"<time datetime="{}">{label}</time>"#, at.to_rfc3339()),
            None => label,
        };
        let header_time = match &post.id {
            Some(id) => format!(r#"<a href="/{author}/status/{}">{time}</a>"#, escape(id)),
            None => time,
        };

        let social = if post.kind == ItemKind::Reshare {
            r#"<div data-testid="socialContext"><span>You reposted</span></div>"#.to_string()
        } else {
            String::new()
        };
        let reply = match (&post.kind, &post.reply_to) {
            (ItemKind::Reply, to) => {
                let to = escape(to.as_deref().unwrap_or("someone"));
                format!(r#"<div><span>Replying to </span><a href="/{to}"><span>@{to}</span></a></div>"#)
            }
            _ => String::new(),
        };
        let quote = if post.kind == ItemKind::Quote {
            r#"<div data-testid="quoteTweet" role="link"><span>Embedded post</span></div>"#
        } else {
            ""
        };
        let actions = if post.fault == Some(Fault::NoActions) {
            String::new()
        } else {
            let toggle = if post.kind == ItemKind::Reshare {
                r#"<button data-testid="unretweet" aria-label="Undo repost" data-sim-action="reshare"></button>"#
            } else {
                r#"<button data-testid="retweet" aria-label="Repost" data-sim-action="reshare"></button>"#
            };
            format!(
                r#"<div role="group">{toggle}<button data-testid="caret" aria-label="More" aria-haspopup="menu" data-sim-action="menu"></button></div>"#
            )
        };

        format!(
            r#"<div data-testid="cellInnerDiv" data-sim-slot="{position}"><article data-testid="tweet" data-sim-post="{key}">{social}<div data-testid="User-Name"><a href="/{author}"><span>@{author}</span></a> {header_time}</div>{reply}<div data-testid="tweetText" lang="en"><span>{text}</span></div>{quote}{actions}</article></div>"#,
            key = escape(&slot.key),
            text = escape(&post.text),
        )
    }

    fn render_overlay(&self) -> String {
        match &self.overlay {
            Overlay::None => String::new(),
            Overlay::OverflowMenu(key) => {
                let delete = if self.fault(key) == Some(Fault::NoDeleteOption) {
                    ""
                } else {
                    r#"<div role="menuitem" data-sim-action="delete"><span>Delete</span></div>"#
                };
                format!(
                    r#"<div id="layers"><div data-testid="Dropdown" role="menu">{delete}<div role="menuitem" data-sim-action="dismiss"><span>Pin to your profile</span></div></div></div>"#
                )
            }
            Overlay::ReshareMenu(key) => {
                let reshared = self
                    .slot(key)
                    .map(|slot| slot.post.kind == ItemKind::Reshare)
                    .unwrap_or(false);
                let undo = if reshared && self.fault(key) != Some(Fault::NoUndoOption) {
                    r#"<div role="menuitem" data-sim-action="undo"><span>Undo repost</span></div>"#
                } else {
                    r#"<div role="menuitem" data-sim-action="dismiss"><span>Repost</span></div>"#
                };
                format!(
                    r#"<div id="layers"><div data-testid="Dropdown" role="menu">{undo}<div role="menuitem" data-sim-action="dismiss"><span>Quote</span></div></div></div>"#
                )
            }
            Overlay::ConfirmSheet(key) => {
                let confirm = if self.fault(key) == Some(Fault::PlainConfirm) {
                    r#"<div role="button" data-sim-action="confirm"><span>Delete</span></div>"#
                } else {
                    r#"<button data-testid="confirmationSheetConfirm" data-sim-action="confirm"><span>Delete</span></button>"#
                };
                format!(
                    r#"<div id="layers"><div role="alertdialog"><span>Delete post?</span>{confirm}<button data-testid="confirmationSheetCancel" data-sim-action="dismiss"><span>Cancel</span></button></div></div>"#
                )
            }
        }
    }

    fn apply_click(&mut self, action: Option<&str>, post: Option<String>) {
        let overlay = std::mem::replace(&mut self.overlay, Overlay::None);
        match (action, post) {
            (Some("menu"), Some(key)) => {
                *self.attempts.entry(key.clone()).or_default() += 1;
                self.overlay = Overlay::OverflowMenu(key);
            }
            (Some("reshare"), Some(key)) => {
                *self.attempts.entry(key.clone()).or_default() += 1;
                self.overlay = Overlay::ReshareMenu(key);
            }
            (Some("delete"), _) => {
                if let Overlay::OverflowMenu(key) = overlay {
                    if self.fault(&key) != Some(Fault::NoConfirm) {
                        self.overlay = Overlay::ConfirmSheet(key);
                    }
                }
            }
            (Some("confirm"), _) => {
                if let Overlay::ConfirmSheet(key) = overlay {
                    self.remove(&key);
                }
            }
            (Some("undo"), _) => {
                if let Overlay::ReshareMenu(key) = overlay {
                    self.remove(&key);
                }
            }
            _ => {}
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.key == key) {
            if !slot.removed {
                slot.removed = true;
                self.removed.push(key.to_string());
                debug!(key, "sim post removed");
            }
        }
        self.scroll_top = self.scroll_top.min(self.max_scroll());
    }

    fn load_more(&mut self) {
        if self.at_bottom() && self.loaded < self.slots.len() {
            self.loaded = (self.loaded + self.page_size).min(self.slots.len());
            debug!(loaded = self.loaded, "sim page loaded");
        }
    }
}

// One parse of the current HTML. Handles carry the generation they were
// issued in plus the element's document-order index.
struct Doc {
    document: Html,
    generation: u32,
}

impl Doc {
    fn parse(html: &str, generation: u32) -> Self {
        Self {
            document: Html::parse_document(html),
            generation,
        }
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> + '_ {
        self.document.tree.root().descendants().filter_map(ElementRef::wrap)
    }

    fn element(&self, handle: ElementHandle) -> SurfaceResult<ElementRef<'_>> {
        let raw = handle.raw();
        if (raw >> 32) as u32 != self.generation {
            return Err(SurfaceError::Detached);
        }
        self.elements()
            .nth((raw & 0xffff_ffff) as usize)
            .ok_or(SurfaceError::Detached)
    }

    fn handle_at(&self, ordinal: usize) -> ElementHandle {
        ElementHandle::from_raw((u64::from(self.generation) << 32) | ordinal as u64)
    }

    fn handle(&self, element: ElementRef<'_>) -> SurfaceResult<ElementHandle> {
        self.elements()
            .position(|candidate| candidate.id() == element.id())
            .map(|ordinal| self.handle_at(ordinal))
            .ok_or(SurfaceError::Detached)
    }

    fn matching(
        &self,
        selector: &Selector,
        mut keep: impl FnMut(&ElementRef<'_>) -> bool,
    ) -> Vec<ElementHandle> {
        self.elements()
            .enumerate()
            .filter(|(_, element)| keep(element) && selector.matches(element))
            .map(|(ordinal, _)| self.handle_at(ordinal))
            .collect()
    }
}

fn parse_selector(selector: &str) -> SurfaceResult<Selector> {
    Selector::parse(selector)
        .map_err(|err| SurfaceError::InvalidSelector(format!("{selector}: {err:?}")))
}

fn self_and_ancestors<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    iter::once(element).chain(element.ancestors().filter_map(ElementRef::wrap))
}

fn attr_upwards(element: ElementRef<'_>, name: &str) -> Option<String> {
    self_and_ancestors(element).find_map(|node| node.value().attr(name).map(str::to_string))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

impl Surface for SimFeed {
    fn location(&self) -> SurfaceResult<String> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.location.clone())
    }

    fn query_all(&self, selector: &str) -> SurfaceResult<Vec<ElementHandle>> {
        let selector = parse_selector(selector)?;
        self.read(|_, doc| Ok(doc.matching(&selector, |_| true)))
    }

    fn query_within(
        &self,
        scope: ElementHandle,
        selector: &str,
    ) -> SurfaceResult<Vec<ElementHandle>> {
        let selector = parse_selector(selector)?;
        self.read(|_, doc| {
            let scope = doc.element(scope)?.id();
            Ok(doc.matching(&selector, |element| {
                element.ancestors().any(|ancestor| ancestor.id() == scope)
            }))
        })
    }

    fn closest(
        &self,
        element: ElementHandle,
        selector: &str,
    ) -> SurfaceResult<Option<ElementHandle>> {
        let selector = parse_selector(selector)?;
        self.read(|_, doc| {
            let element = doc.element(element)?;
            match self_and_ancestors(element).find(|node| selector.matches(node)) {
                Some(found) => doc.handle(found).map(Some),
                None => Ok(None),
            }
        })
    }

    fn text_content(&self, element: ElementHandle) -> SurfaceResult<String> {
        self.read(|_, doc| Ok(doc.element(element)?.text().collect()))
    }

    fn attribute(&self, element: ElementHandle, name: &str) -> SurfaceResult<Option<String>> {
        self.read(|_, doc| Ok(doc.element(element)?.value().attr(name).map(str::to_string)))
    }

    fn sibling_position(&self, element: ElementHandle) -> SurfaceResult<Option<usize>> {
        self.read(|_, doc| {
            let element = doc.element(element)?;
            let Some(parent) = element.parent() else {
                return Ok(None);
            };
            Ok(parent
                .children()
                .filter(|child| child.value().is_element())
                .position(|child| child.id() == element.id()))
        })
    }

    fn offset_top(&self, element: ElementHandle) -> SurfaceResult<f64> {
        self.read(|state, doc| {
            let element = doc.element(element)?;
            let mut in_action_bar = false;
            for node in self_and_ancestors(element) {
                match node.value().attr("role") {
                    Some("menu") | Some("alertdialog") => {
                        return Ok(state.scroll_top + OVERLAY_OFFSET)
                    }
                    Some("group") => in_action_bar = true,
                    _ => {}
                }
                if let Some(position) = node
                    .value()
                    .attr("data-sim-slot")
                    .and_then(|raw| raw.parse::<f64>().ok())
                {
                    let offset = if in_action_bar { ACTION_BAR_OFFSET } else { 0.0 };
                    return Ok(position * ITEM_HEIGHT + offset);
                }
            }
            Ok(0.0)
        })
    }

    fn viewport_height(&self) -> SurfaceResult<f64> {
        self.state.lock().check_online()?;
        Ok(VIEWPORT_HEIGHT)
    }

    fn scroll_height(&self) -> SurfaceResult<f64> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.scroll_height())
    }

    fn scroll_to(&self, top: f64) -> SurfaceResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        let top = if top.is_finite() { top } else { 0.0 };
        state.scroll_top = top.clamp(0.0, state.max_scroll());
        state.load_more();
        state.rerender();
        Ok(())
    }

    fn click(&self, element: ElementHandle) -> SurfaceResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        let (action, post) = {
            let doc = Doc::parse(&state.html, state.generation);
            let element = doc.element(element)?;
            (
                attr_upwards(element, "data-sim-action"),
                attr_upwards(element, "data-sim-post"),
            )
        };
        debug!(action = ?action, post = ?post, "sim click");
        state.apply_click(action.as_deref(), post);
        state.rerender();
        Ok(())
    }

    fn press_escape(&self) -> SurfaceResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        state.overlay = Overlay::None;
        state.rerender();
        Ok(())
    }

    fn click_background(&self) -> SurfaceResult<()> {
        self.press_escape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, day, 12, 0, 0).unwrap()
    }

    fn feed(count: usize, page_size: usize) -> SimFeed {
        let posts = (1..=count)
            .map(|n| SimPost::new(n.to_string(), ItemKind::Original, at(n as u32)))
            .collect();
        SimFeed::new(FeedFixture::new("https://x.com/me", posts).with_page_size(page_size))
    }

    #[test]
    fn renders_first_page_only() {
        let sim = feed(5, 2);
        let items = sim.query_all(r#"[data-testid="tweet"]"#).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(sim.scroll_height().unwrap(), VIEWPORT_HEIGHT.max(2.0 * ITEM_HEIGHT));
    }

    #[test]
    fn scrolling_to_bottom_loads_next_page() {
        let sim = feed(5, 2);
        let before = sim.scroll_height().unwrap();
        sim.scroll_to(before).unwrap();
        assert_eq!(sim.loaded(), 4);
        assert!(sim.scroll_height().unwrap() > before);
    }

    #[test]
    fn rerender_detaches_old_handles() {
        let sim = feed(3, 3);
        let item = sim.query_first(r#"[data-testid="tweet"]"#).unwrap().unwrap();
        let caret = sim
            .query_first_within(item, r#"[data-testid="caret"]"#)
            .unwrap()
            .unwrap();
        sim.click(caret).unwrap();
        assert!(sim.overlay_open());
        assert_eq!(sim.text_content(item), Err(SurfaceError::Detached));
    }

    #[test]
    fn delete_then_confirm_removes_post() {
        let sim = feed(2, 2);
        let item = sim.query_first(r#"[data-testid="tweet"]"#).unwrap().unwrap();
        let caret = sim
            .query_first_within(item, r#"[data-testid="caret"]"#)
            .unwrap()
            .unwrap();
        sim.click(caret).unwrap();
        let delete = sim.query_all(r#"[role="menuitem"]"#).unwrap()[0];
        assert_eq!(sim.text_content(delete).unwrap(), "Delete");
        sim.click(delete).unwrap();
        let confirm = sim
            .query_first(r#"[data-testid="confirmationSheetConfirm"]"#)
            .unwrap()
            .unwrap();
        sim.click(confirm).unwrap();
        assert_eq!(sim.removed(), vec!["1".to_string()]);
        assert_eq!(sim.attempts("1"), 1);
        assert!(!sim.overlay_open());
    }

    #[test]
    fn closest_and_offsets() {
        let sim = feed(3, 3);
        let items = sim.query_all(r#"[data-testid="tweet"]"#).unwrap();
        let link = sim
            .query_first_within(items[1], r#"a[href*="/status/"]"#)
            .unwrap()
            .unwrap();
        assert_eq!(sim.closest(link, "article").unwrap(), Some(items[1]));
        assert_eq!(sim.offset_top(items[1]).unwrap(), ITEM_HEIGHT);
        assert_eq!(sim.sibling_position(items[1]).unwrap(), Some(0));
    }

    #[test]
    fn invalid_selector_is_reported() {
        let sim = feed(1, 1);
        assert!(matches!(
            sim.query_all("[[nope"),
            Err(SurfaceError::InvalidSelector(_))
        ));
    }

    #[test]
    fn fixture_from_yaml() {
        let fixture = FeedFixture::from_yaml(
            "location: https://x.com/alice\nposts:\n  - id: '7'\n    kind: reshare\n    author: bob\n    label: 3h\n    fault: no_undo_option\n",
        )
        .unwrap();
        assert_eq!(fixture.page_size, 3);
        assert_eq!(fixture.posts[0].kind, ItemKind::Reshare);
        assert_eq!(fixture.posts[0].fault, Some(Fault::NoUndoOption));
        assert_eq!(fixture.posts[0].label.as_deref(), Some("3h"));
    }
}
