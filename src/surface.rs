use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("element is no longer attached to the document")]
    Detached,
    #[error("invalid selector {0:?}")]
    InvalidSelector(String),
    #[error("surface unavailable: {0}")]
    Unavailable(String),
}

pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

pub trait Surface: Send + Sync {
    fn location(&self) -> SurfaceResult<String>;

    fn query_all(&self, selector: &str) -> SurfaceResult<Vec<ElementHandle>>;

    fn query_within(&self, scope: ElementHandle, selector: &str)
        -> SurfaceResult<Vec<ElementHandle>>;

    fn closest(&self, element: ElementHandle, selector: &str)
        -> SurfaceResult<Option<ElementHandle>>;

    fn text_content(&self, element: ElementHandle) -> SurfaceResult<String>;

    fn attribute(&self, element: ElementHandle, name: &str) -> SurfaceResult<Option<String>>;

    fn sibling_position(&self, element: ElementHandle) -> SurfaceResult<Option<usize>>;

    fn offset_top(&self, element: ElementHandle) -> SurfaceResult<f64>;

    fn viewport_height(&self) -> SurfaceResult<f64>;

    fn scroll_height(&self) -> SurfaceResult<f64>;

    fn scroll_to(&self, top: f64) -> SurfaceResult<()>;

    fn click(&self, element: ElementHandle) -> SurfaceResult<()>;

    fn press_escape(&self) -> SurfaceResult<()>;

    fn click_background(&self) -> SurfaceResult<()>;

    fn query_first(&self, selector: &str) -> SurfaceResult<Option<ElementHandle>> {
        Ok(self.query_all(selector)?.into_iter().next())
    }

    fn query_first_within(
        &self,
        scope: ElementHandle,
        selector: &str,
    ) -> SurfaceResult<Option<ElementHandle>> {
        Ok(self.query_within(scope, selector)?.into_iter().next())
    }

    fn query_first_of(
        &self,
        scope: ElementHandle,
        selectors: &[&str],
    ) -> SurfaceResult<Option<ElementHandle>> {
        for selector in selectors {
            if let Some(found) = self.query_first_within(scope, selector)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
