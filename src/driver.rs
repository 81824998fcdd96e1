use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::selector::Selector;

/// Where an element query searches: the whole page, or the descendants of a
/// previously resolved element.
#[derive(Debug)]
pub enum Scope<'a, E> {
    Page,
    Within(&'a E),
}

// Copy regardless of E; the derive would require E: Copy.
impl<E> Clone for Scope<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Scope<'_, E> {}

/// The primitive operations this crate needs from a browser-automation backend.
///
/// `Session` layers all polling, retrying, and window bookkeeping on top, so a
/// driver performs each call exactly once and reports the immediate result.
/// "No match right now" is `Ok(None)` or an empty vec, never an error; element
/// handles are weak references and a stale one simply stops matching.
#[async_trait]
pub trait Driver: Send + Sync {
    type Element: Send + Sync;
    type Window: Clone + PartialEq + std::fmt::Debug + Send + Sync;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn refresh(&self) -> Result<()>;

    /// Current URL of the focused window; empty when the driver does not know
    /// it yet.
    async fn current_url(&self) -> Result<String>;

    async fn find_element(
        &self,
        scope: Scope<'_, Self::Element>,
        selector: &Selector,
    ) -> Result<Option<Self::Element>>;

    async fn find_elements(
        &self,
        scope: Scope<'_, Self::Element>,
        selector: &Selector,
    ) -> Result<Vec<Self::Element>>;

    async fn click(&self, element: &Self::Element) -> Result<()>;

    async fn clear(&self, element: &Self::Element) -> Result<()>;

    async fn send_keys(&self, element: &Self::Element, text: &str) -> Result<()>;

    /// Run a script in the focused window. The script text is the body of a
    /// function; when `element` is given, the parameter `el` is bound to it.
    async fn run_script(&self, script: &str, element: Option<&Self::Element>) -> Result<Value>;

    async fn list_windows(&self) -> Result<Vec<Self::Window>>;

    async fn current_window(&self) -> Result<Self::Window>;

    async fn switch_window(&self, window: &Self::Window) -> Result<()>;

    async fn close_window(&self, window: &Self::Window) -> Result<()>;

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;

    /// Tear down the browser. Called at most once, by `Session::close`.
    async fn close(&mut self) -> Result<()>;
}
