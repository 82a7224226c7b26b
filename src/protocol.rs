use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{Classifier, FeedItem, ItemKind};
use crate::clock::Clock;
use crate::config::TimingsConfig;
use crate::locate::Locator;
use crate::surface::{ElementHandle, Surface, SurfaceResult};

pub const RESHARE_TOGGLE_SELECTORS: &[&str] = &[
    r#"[data-testid="retweet"]"#,
    r#"[data-testid="unretweet"]"#,
    r#"button[data-testid="retweet"]"#,
    r#"div[data-testid="retweet"]"#,
    r#"[aria-label*="转推"]"#,
    r#"[aria-label*="Retweet"]"#,
    r#"[aria-label*="已转推"]"#,
    r#"[aria-label*="Retweeted"]"#,
    r#"[aria-label*="Undo repost"]"#,
];

pub const OVERFLOW_SELECTORS: &[&str] = &[
    r#"[data-testid="caret"]"#,
    r#"[aria-label*="更多"]"#,
    r#"[aria-label*="More"]"#,
    r#"button[aria-haspopup="menu"]"#,
    r#"div[role="button"][aria-haspopup="menu"]"#,
];

const DELETE_OPTION_SELECTORS: &[&str] = &[
    r#"[data-testid="Dropdown"] [role="menuitem"]"#,
    r#"[role="menuitem"]"#,
    r#"div[role="menuitem"]"#,
    r#"a[role="menuitem"]"#,
];

const UNDO_OPTION_SELECTORS: &[&str] =
    &[r#"[role="menuitem"], [data-testid="Dropdown"] [role="menuitem"]"#];

const CONFIRM_SELECTORS: &[&str] = &[
    r#"[data-testid="confirmationSheetConfirm"]"#,
    r#"button[data-testid="confirmationSheetConfirm"]"#,
    r#"[role="button"][data-testid="confirmationSheetConfirm"]"#,
];

const CONFIRM_FALLBACK_SELECTOR: &str = r#"button, div[role="button"]"#;

pub const DELETE_PHRASES: &[&str] = &["删除", "delete"];

pub const UNDO_PHRASES: &[&str] = &[
    "取消转推",
    "撤销转帖",
    "undo retweet",
    "unretweet",
    "取消转发",
    "undo repost",
    "remove repost",
];

// Fraction of the viewport left above the target after repositioning.
const TOGGLE_BIAS: f64 = 0.7;
const ITEM_BIAS: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    UndoReshare,
    DeleteViaMenu,
}

impl Protocol {
    pub fn for_kind(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Reshare => Protocol::UndoReshare,
            ItemKind::Original | ItemKind::Reply | ItemKind::Quote => Protocol::DeleteViaMenu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Failure {
    ItemNotFound,
    ReshareToggleMissing,
    UndoOptionMissing,
    OverflowMenuMissing,
    DeleteOptionMissing,
    ConfirmMissing,
    SurfaceFault,
}

impl Failure {
    pub fn describe(&self) -> &'static str {
        match self {
            Failure::ItemNotFound => "item no longer on the surface",
            Failure::ReshareToggleMissing => "reshare toggle not found",
            Failure::UndoOptionMissing => "undo option not found",
            Failure::OverflowMenuMissing => "overflow menu button not found",
            Failure::DeleteOptionMissing => "delete option not found",
            Failure::ConfirmMissing => "confirm button not found",
            Failure::SurfaceFault => "surface error during removal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Removed,
    Failed(Failure),
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Outcome::Removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Reposition,
    OpenReshareMenu,
    FindUndo,
    ClickUndo(ElementHandle),
    OpenOverflowMenu,
    FindDelete,
    ClickDelete(ElementHandle),
    FindConfirm,
    ClickConfirm(ElementHandle),
    Done(Outcome),
}

pub struct RemovalEngine<'a> {
    classifier: &'a Classifier,
    locator: Locator<'a>,
    clock: Arc<dyn Clock>,
    timings: TimingsConfig,
}

impl<'a> RemovalEngine<'a> {
    pub fn new(classifier: &'a Classifier, clock: Arc<dyn Clock>, timings: TimingsConfig) -> Self {
        Self {
            classifier,
            locator: Locator::new(classifier),
            clock,
            timings,
        }
    }

    pub fn run(&self, item: &FeedItem) -> Outcome {
        let protocol = Protocol::for_kind(item.kind);
        let mut step = Step::Reposition;

        loop {
            if let Step::Done(outcome) = step {
                match outcome {
                    Outcome::Removed => info!(id = %item.identity, kind = %item.kind, "item removed"),
                    Outcome::Failed(failure) => warn!(
                        id = %item.identity,
                        kind = %item.kind,
                        reason = failure.describe(),
                        "removal failed"
                    ),
                }
                return outcome;
            }

            debug!(id = %item.identity, step = ?step, "removal step");
            step = match self.advance(protocol, item, step) {
                Ok(next) => next,
                Err(err) => {
                    warn!(id = %item.identity, error = %err, "surface error during removal");
                    self.dismiss_with_escape();
                    Step::Done(Outcome::Failed(Failure::SurfaceFault))
                }
            };
        }
    }

    fn advance(&self, protocol: Protocol, item: &FeedItem, step: Step) -> SurfaceResult<Step> {
        let surface = self.surface();
        let next = match step {
            Step::Reposition => {
                self.reposition(protocol, item);
                match protocol {
                    Protocol::UndoReshare => Step::OpenReshareMenu,
                    Protocol::DeleteViaMenu => Step::OpenOverflowMenu,
                }
            }
            Step::OpenReshareMenu => {
                let Some(element) = self.live(item) else {
                    return Ok(Step::Done(Outcome::Failed(Failure::ItemNotFound)));
                };
                let Some(toggle) = surface.query_first_of(element, RESHARE_TOGGLE_SELECTORS)? else {
                    return Ok(Step::Done(Outcome::Failed(Failure::ReshareToggleMissing)));
                };
                surface.click(toggle)?;
                Step::FindUndo
            }
            Step::FindUndo => {
                match self.settle(self.timings.reshare_menu_open, || {
                    self.find_option(UNDO_OPTION_SELECTORS, UNDO_PHRASES)
                })? {
                    Some(option) => Step::ClickUndo(option),
                    None => {
                        self.dismiss_with_escape();
                        Step::Done(Outcome::Failed(Failure::UndoOptionMissing))
                    }
                }
            }
            Step::ClickUndo(option) => {
                surface.click(option)?;
                self.clock.sleep(self.timings.after_undo);
                Step::Done(Outcome::Removed)
            }
            Step::OpenOverflowMenu => {
                let Some(element) = self.live(item) else {
                    return Ok(Step::Done(Outcome::Failed(Failure::ItemNotFound)));
                };
                let Some(button) = surface.query_first_of(element, OVERFLOW_SELECTORS)? else {
                    return Ok(Step::Done(Outcome::Failed(Failure::OverflowMenuMissing)));
                };
                surface.click(button)?;
                Step::FindDelete
            }
            Step::FindDelete => {
                match self.settle(self.timings.menu_open, || {
                    self.find_option(DELETE_OPTION_SELECTORS, DELETE_PHRASES)
                })? {
                    Some(option) => Step::ClickDelete(option),
                    None => {
                        surface.click_background()?;
                        self.clock.sleep(self.timings.dismiss);
                        Step::Done(Outcome::Failed(Failure::DeleteOptionMissing))
                    }
                }
            }
            Step::ClickDelete(option) => {
                surface.click(option)?;
                Step::FindConfirm
            }
            Step::FindConfirm => {
                match self.settle(self.timings.confirm_sheet, || self.find_confirm())? {
                    Some(button) => Step::ClickConfirm(button),
                    None => {
                        self.dismiss_with_escape();
                        Step::Done(Outcome::Failed(Failure::ConfirmMissing))
                    }
                }
            }
            Step::ClickConfirm(button) => {
                surface.click(button)?;
                self.clock.sleep(self.timings.after_confirm);
                Step::Done(Outcome::Removed)
            }
            Step::Done(outcome) => Step::Done(outcome),
        };
        Ok(next)
    }

    fn surface(&self) -> &dyn Surface {
        self.classifier.surface()
    }

    fn live(&self, item: &FeedItem) -> Option<ElementHandle> {
        self.locator.relocate(&item.identity, Some(item.element))
    }

    fn settle<T>(
        &self,
        wait: Duration,
        probe: impl FnOnce() -> SurfaceResult<Option<T>>,
    ) -> SurfaceResult<Option<T>> {
        self.clock.sleep(wait);
        probe()
    }

    fn reposition(&self, protocol: Protocol, item: &FeedItem) {
        if let Err(err) = self.try_reposition(protocol, item) {
            debug!(id = %item.identity, error = %err, "reposition failed");
        }
        self.clock.sleep(self.timings.scroll_settle);
    }

    fn try_reposition(&self, protocol: Protocol, item: &FeedItem) -> SurfaceResult<()> {
        let surface = self.surface();
        let Some(element) = self.live(item) else {
            return Ok(());
        };
        let (target, bias) = match protocol {
            Protocol::UndoReshare => match surface.query_first_of(element, RESHARE_TOGGLE_SELECTORS)? {
                Some(toggle) => (toggle, TOGGLE_BIAS),
                None => (element, ITEM_BIAS),
            },
            Protocol::DeleteViaMenu => (element, ITEM_BIAS),
        };
        let top = surface.offset_top(target)? - surface.viewport_height()? * bias;
        surface.scroll_to(top.max(0.0))
    }

    fn find_option(
        &self,
        selectors: &[&str],
        phrases: &[&str],
    ) -> SurfaceResult<Option<ElementHandle>> {
        let surface = self.surface();
        for selector in selectors {
            for option in surface.query_all(selector)? {
                if contains_phrase(&surface.text_content(option)?, phrases) {
                    return Ok(Some(option));
                }
            }
        }
        Ok(None)
    }

    fn find_confirm(&self) -> SurfaceResult<Option<ElementHandle>> {
        let surface = self.surface();
        for selector in CONFIRM_SELECTORS {
            if let Some(button) = surface.query_first(selector)? {
                return Ok(Some(button));
            }
        }
        for button in surface.query_all(CONFIRM_FALLBACK_SELECTOR)? {
            if contains_phrase(&surface.text_content(button)?, DELETE_PHRASES) {
                debug!("confirm found by label");
                return Ok(Some(button));
            }
        }
        Ok(None)
    }

    fn dismiss_with_escape(&self) {
        if let Err(err) = self.surface().press_escape() {
            debug!(error = %err, "escape failed");
        }
        self.clock.sleep(self.timings.dismiss);
    }
}

fn contains_phrase(text: &str, phrases: &[&str]) -> bool {
    let text = text.trim().to_lowercase();
    phrases
        .iter()
        .any(|phrase| text.contains(&phrase.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_follows_kind() {
        assert_eq!(Protocol::for_kind(ItemKind::Reshare), Protocol::UndoReshare);
        for kind in [ItemKind::Original, ItemKind::Reply, ItemKind::Quote] {
            assert_eq!(Protocol::for_kind(kind), Protocol::DeleteViaMenu);
        }
    }

    #[test]
    fn phrases_match_case_insensitively() {
        assert!(contains_phrase("  Delete ", DELETE_PHRASES));
        assert!(contains_phrase("删除", DELETE_PHRASES));
        assert!(contains_phrase("Undo Repost", UNDO_PHRASES));
        assert!(contains_phrase("取消转推", UNDO_PHRASES));
        assert!(!contains_phrase("Pin to your profile", DELETE_PHRASES));
        assert!(!contains_phrase("Quote", UNDO_PHRASES));
    }

    #[test]
    fn only_removed_succeeds() {
        assert!(Outcome::Removed.succeeded());
        assert!(!Outcome::Failed(Failure::ConfirmMissing).succeeded());
    }
}
