use tracing::debug;

use crate::classify::{post_number_from_href, Classifier, Identity};
use crate::surface::{ElementHandle, SurfaceResult};

const CONTAINER_SELECTORS: &[&str] = &[
    r#"article[data-testid="tweet"], article"#,
    r#"[data-testid="tweet"], [data-testid="cellInnerDiv"] article"#,
];

pub struct Locator<'a> {
    classifier: &'a Classifier,
}

impl<'a> Locator<'a> {
    pub fn new(classifier: &'a Classifier) -> Self {
        Self { classifier }
    }

    // `hint` is a handle captured earlier; it is only returned if it still
    // carries the same identity.
    pub fn relocate(&self, identity: &Identity, hint: Option<ElementHandle>) -> Option<ElementHandle> {
        match self.try_relocate(identity, hint) {
            Ok(found) => {
                if found.is_none() {
                    debug!(identity = %identity, "item not found on surface");
                }
                found
            }
            Err(err) => {
                debug!(identity = %identity, error = %err, "relocating item failed");
                None
            }
        }
    }

    fn try_relocate(
        &self,
        identity: &Identity,
        hint: Option<ElementHandle>,
    ) -> SurfaceResult<Option<ElementHandle>> {
        if identity.is_post_number() {
            if let Some(found) = self.by_permalink(&identity.key)? {
                return Ok(Some(found));
            }
        }

        if let Some(hint) = hint {
            if self.classifier.resolve_identity(hint).key == identity.key {
                return Ok(Some(hint));
            }
        }

        for candidate in self.classifier.candidates()? {
            let matches = if identity.is_post_number() {
                self.classifier
                    .permalink_ids(candidate)
                    .unwrap_or_default()
                    .iter()
                    .any(|id| *id == identity.key)
            } else {
                self.classifier.resolve_identity(candidate).key == identity.key
            };
            if matches {
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }

    // Container whose own permalink is `id`; failing that, the first
    // container linking to `id` at all (a quote embedding it).
    fn by_permalink(&self, id: &str) -> SurfaceResult<Option<ElementHandle>> {
        let surface = self.classifier.surface();
        let selector = format!(r#"a[href*="/status/{id}"]"#);
        let mut fallback = None;

        for anchor in surface.query_all(&selector)? {
            let href = surface.attribute(anchor, "href")?;
            if href.as_deref().and_then(post_number_from_href).as_deref() != Some(id) {
                continue;
            }
            let Some(container) = self.container_of(anchor)? else {
                continue;
            };
            if self.classifier.permalink_id(container)?.as_deref() == Some(id) {
                return Ok(Some(container));
            }
            fallback.get_or_insert(container);
        }

        Ok(fallback)
    }

    fn container_of(&self, anchor: ElementHandle) -> SurfaceResult<Option<ElementHandle>> {
        let surface = self.classifier.surface();
        for selector in CONTAINER_SELECTORS {
            if let Some(found) = surface.closest(anchor, selector)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
