//! Simulated page driver.
//!
//! [`SimulatedPage`] serves documents from an in-memory route table and
//! implements [`PageDriver`] against them: selector queries, visibility and
//! actionability, caret editing, focus/blur/submit reactions, scrolling and
//! deterministic rendering. It lets the whole harness run without a browser.

mod dom;
mod render;
mod selector;

pub use dom::{ClickRecord, Document, DomEvent, ElementSpec, Reaction, Relative};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::driver::{ElementHandle, ElementId, ElementState, PageDriver, Screenshot, Sibling, Size};
use crate::keyboard::KeyInput;
use crate::locator::{BoundingBox, Point};
use crate::result::{MirarError, MirarResult};
use selector::SelectorList;

#[derive(Debug)]
struct Loaded {
    url: String,
    document: Document,
    // Bumped per navigation so handles from an old document are rejected
    generation: u32,
}

#[derive(Debug, Default)]
struct PageState {
    loaded: Option<Loaded>,
    generation: u32,
    call_history: Vec<String>,
}

/// In-memory [`PageDriver`]
#[derive(Debug)]
pub struct SimulatedPage {
    routes: HashMap<String, Document>,
    viewport: Size,
    state: Mutex<PageState>,
}

impl Default for SimulatedPage {
    fn default() -> Self {
        Self::new(Size::new(1000.0, 660.0))
    }
}

impl SimulatedPage {
    /// Create a page with no routes and the given window size
    #[must_use]
    pub fn new(viewport: Size) -> Self {
        Self {
            routes: HashMap::new(),
            viewport,
            state: Mutex::new(PageState::default()),
        }
    }

    /// Serve `document` at `url`; every navigation loads a fresh copy
    #[must_use]
    pub fn with_route(mut self, url: impl Into<String>, document: Document) -> Self {
        self.routes.insert(url.into(), document);
        self
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: String) {
        self.lock().call_history.push(call);
    }

    /// Driver calls in order, e.g. `navigate:<url>` or `click:.btn`
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.lock().call_history.clone()
    }

    /// Check if a driver method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.lock()
            .call_history
            .iter()
            .any(|c| c.starts_with(method))
    }

    /// URL of the loaded document
    #[must_use]
    pub fn current_url(&self) -> Option<String> {
        self.lock().loaded.as_ref().map(|l| l.url.clone())
    }

    /// Clicks dispatched to the loaded document
    #[must_use]
    pub fn clicks(&self) -> Vec<ClickRecord> {
        self.lock()
            .loaded
            .as_ref()
            .map(|l| l.document.clicks().to_vec())
            .unwrap_or_default()
    }

    /// Run `f` against the loaded document
    pub fn with_document<R>(&self, f: impl FnOnce(&mut Document) -> R) -> MirarResult<R> {
        let mut state = self.lock();
        let loaded = state.loaded.as_mut().ok_or_else(no_document)?;
        Ok(f(&mut loaded.document))
    }

    fn for_each_match(
        &self,
        selector: &str,
        f: impl Fn(&mut Document, usize),
    ) -> MirarResult<usize> {
        let list = SelectorList::parse(selector)?;
        self.with_document(|doc| {
            let matches = doc.query(&list, None);
            for &index in &matches {
                f(doc, index);
            }
            matches.len()
        })
    }

    /// Hide or show every element matching `selector`
    pub fn set_hidden(&self, selector: &str, hidden: bool) -> MirarResult<usize> {
        self.for_each_match(selector, |doc, i| doc.set_hidden(i, hidden))
    }

    /// Disable or enable every element matching `selector`
    pub fn set_disabled(&self, selector: &str, disabled: bool) -> MirarResult<usize> {
        self.for_each_match(selector, |doc, i| doc.set_disabled(i, disabled))
    }

    /// Detach every element matching `selector`
    pub fn remove(&self, selector: &str) -> MirarResult<usize> {
        self.for_each_match(selector, |doc, i| doc.detach(i))
    }

    /// Run `f` with the document and the node `handle` designates
    fn with_node<R>(
        &self,
        call: &str,
        handle: &ElementHandle,
        f: impl FnOnce(&mut Document, usize) -> R,
    ) -> MirarResult<R> {
        let mut state = self.lock();
        state
            .call_history
            .push(format!("{call}:{}", handle.selector()));
        let loaded = state.loaded.as_mut().ok_or_else(no_document)?;
        let (generation, index) = split_id(handle.id());
        if generation != loaded.generation || loaded.document.node(index).is_none() {
            return Err(MirarError::driver(format!(
                "element {} ({}) belongs to a previous document",
                handle.id(),
                handle.selector()
            )));
        }
        Ok(f(&mut loaded.document, index))
    }
}

fn no_document() -> MirarError {
    MirarError::driver("no document loaded")
}

fn element_id(generation: u32, index: usize) -> ElementId {
    ElementId((u64::from(generation) << 32) | index as u64)
}

fn split_id(id: ElementId) -> (u32, usize) {
    ((id.0 >> 32) as u32, (id.0 & u64::from(u32::MAX)) as usize)
}

fn snapshot(doc: &Document, index: usize) -> Option<ElementState> {
    let node = doc.node(index)?;
    let bounds = doc.layout_box(index);
    Some(ElementState {
        tag: node.tag.clone(),
        value: node.value.clone(),
        classes: node.classes.clone(),
        attributes: node.all_attributes(),
        visible: doc.is_visible(index),
        text: doc.text_content(index),
        disabled: node.disabled,
        connected: node.connected,
        obscured: doc.is_obscured(index),
        editable: node.is_editable() && !node.attributes.contains_key("readonly"),
        focusable: node.is_focusable(),
        focused: doc.focused() == Some(index),
        bounds,
        content_size: node
            .scroll_content
            .unwrap_or_else(|| Size::new(bounds.width, bounds.height)),
    })
}

#[async_trait]
impl PageDriver for SimulatedPage {
    async fn navigate(&self, url: &str) -> MirarResult<()> {
        self.record(format!("navigate:{url}"));
        let mut document = self
            .routes
            .get(url)
            .cloned()
            .ok_or_else(|| MirarError::Navigation {
                url: url.to_string(),
                message: "404 Not Found".to_string(),
            })?;
        document.set_viewport(self.viewport);

        let mut state = self.lock();
        state.generation += 1;
        let generation = state.generation;
        state.loaded = Some(Loaded {
            url: url.to_string(),
            document,
            generation,
        });
        tracing::debug!(url, generation, "simulated page loaded");
        Ok(())
    }

    async fn query_all(
        &self,
        selector: &str,
        scope: Option<&ElementHandle>,
    ) -> MirarResult<Vec<ElementHandle>> {
        let list = SelectorList::parse(selector)?;
        let mut state = self.lock();
        state.call_history.push(format!("query:{selector}"));
        let loaded = state.loaded.as_ref().ok_or_else(no_document)?;

        let scope = match scope {
            Some(handle) => {
                let (generation, index) = split_id(handle.id());
                if generation != loaded.generation {
                    return Ok(Vec::new());
                }
                Some(index)
            }
            None => None,
        };

        let display = selector.to_string();
        Ok(loaded
            .document
            .query(&list, scope)
            .into_iter()
            .map(|i| ElementHandle::new(element_id(loaded.generation, i), display.clone()))
            .collect())
    }

    async fn sibling(
        &self,
        handle: &ElementHandle,
        direction: Sibling,
    ) -> MirarResult<Option<ElementHandle>> {
        let (generation, _) = split_id(handle.id());
        let suffix = match direction {
            Sibling::Previous => "prev",
            Sibling::Next => "next",
        };
        self.with_node(suffix, handle, |doc, index| {
            doc.sibling(index, direction == Sibling::Next).map(|i| {
                ElementHandle::new(
                    element_id(generation, i),
                    format!("{} ({suffix})", handle.selector()),
                )
            })
        })
    }

    async fn state(&self, handle: &ElementHandle) -> MirarResult<ElementState> {
        self.with_node("state", handle, |doc, index| snapshot(doc, index))?
            .ok_or_else(no_document)
    }

    async fn press(&self, handle: &ElementHandle, input: KeyInput) -> MirarResult<()> {
        self.with_node("press", handle, |doc, index| doc.press(index, input))
    }

    async fn click_at(&self, handle: &ElementHandle, point: Point) -> MirarResult<()> {
        self.with_node("click", handle, |doc, index| doc.click(index, point))
    }

    async fn focus(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.with_node("focus", handle, |doc, index| doc.focus(index))
    }

    async fn blur(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.with_node("blur", handle, |doc, index| doc.blur(index))
    }

    async fn clear(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.with_node("clear", handle, |doc, index| doc.clear(index))
    }

    async fn submit(&self, handle: &ElementHandle) -> MirarResult<bool> {
        self.with_node("submit", handle, |doc, index| doc.submit(index))
    }

    async fn scroll_into_view(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.with_node("scroll", handle, |doc, index| doc.scroll_into_view(index))
    }

    async fn viewport(&self) -> MirarResult<BoundingBox> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or_else(no_document)?;
        Ok(loaded.document.viewport_rect())
    }

    async fn document_size(&self) -> MirarResult<Size> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or_else(no_document)?;
        Ok(loaded.document.size())
    }

    async fn capture(&self, clip: BoundingBox) -> MirarResult<Screenshot> {
        let mut state = self.lock();
        state.call_history.push(format!(
            "capture:{}x{}@{},{}",
            clip.width, clip.height, clip.x, clip.y
        ));
        let loaded = state.loaded.as_ref().ok_or_else(no_document)?;
        render::render(&loaded.document, clip)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn page() -> SimulatedPage {
        let body = ElementSpec::new("body")
            .at(0.0, 0.0, 200.0, 400.0)
            .child(
                ElementSpec::new("input")
                    .class("email")
                    .at(10.0, 10.0, 100.0, 20.0),
            )
            .child(ElementSpec::new("button").class("btn").at(10.0, 50.0, 50.0, 20.0))
            .child(ElementSpec::new("button").class("btn").at(70.0, 50.0, 50.0, 20.0));
        SimulatedPage::new(Size::new(200.0, 100.0))
            .with_route("http://test/", Document::new(body, Size::new(200.0, 400.0)))
    }

    #[tokio::test]
    async fn test_navigate_unknown_url() {
        let p = page();
        let err = p.navigate("http://test/missing").await.unwrap_err();
        assert!(matches!(err, MirarError::Navigation { .. }));
        assert!(p.was_called("navigate"));
    }

    #[tokio::test]
    async fn test_query_and_state() {
        let p = page();
        p.navigate("http://test/").await.unwrap();
        let buttons = p.query_all(".btn", None).await.unwrap();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0].selector(), ".btn");

        let s = p.state(&buttons[1]).await.unwrap();
        assert_eq!(s.tag, "button");
        assert!(s.visible);
        assert!(s.focusable);
        assert!(!s.editable);
        assert_eq!(s.bounds, BoundingBox::new(70.0, 50.0, 50.0, 20.0));
    }

    #[tokio::test]
    async fn test_typing_through_driver() {
        let p = page();
        p.navigate("http://test/").await.unwrap();
        let input = p.query_all(".email", None).await.unwrap().remove(0);
        p.focus(&input).await.unwrap();
        for ch in "hi".chars() {
            p.press(
                &input,
                KeyInput::Char {
                    ch,
                    modifiers: crate::keyboard::Modifiers::NONE,
                },
            )
            .await
            .unwrap();
        }
        let s = p.state(&input).await.unwrap();
        assert_eq!(s.value.as_deref(), Some("hi"));
        assert!(s.focused);
    }

    #[tokio::test]
    async fn test_stale_handle_after_navigation() {
        let p = page();
        p.navigate("http://test/").await.unwrap();
        let input = p.query_all(".email", None).await.unwrap().remove(0);
        p.navigate("http://test/").await.unwrap();
        assert!(p.state(&input).await.is_err());
    }

    #[tokio::test]
    async fn test_navigation_resets_document() {
        let p = page();
        p.navigate("http://test/").await.unwrap();
        let input = p.query_all(".email", None).await.unwrap().remove(0);
        p.clear(&input).await.unwrap();
        p.set_hidden(".email", true).unwrap();
        p.navigate("http://test/").await.unwrap();
        let input = p.query_all(".email", None).await.unwrap().remove(0);
        assert!(p.state(&input).await.unwrap().visible);
    }

    #[tokio::test]
    async fn test_test_hooks() {
        let p = page();
        p.navigate("http://test/").await.unwrap();
        assert_eq!(p.set_disabled(".btn", true).unwrap(), 2);
        let btn = p.query_all(".btn", None).await.unwrap().remove(0);
        assert_eq!(
            p.state(&btn).await.unwrap().actionability_issue(),
            Some("disabled")
        );
        assert_eq!(p.remove(".btn").unwrap(), 2);
        assert!(p.query_all(".btn", None).await.unwrap().is_empty());
        assert!(!p.state(&btn).await.unwrap().connected);
    }

    #[tokio::test]
    async fn test_capture_and_geometry() {
        let p = page();
        p.navigate("http://test/").await.unwrap();
        let viewport = p.viewport().await.unwrap();
        assert_eq!(viewport, BoundingBox::new(0.0, 0.0, 200.0, 100.0));
        assert_eq!(p.document_size().await.unwrap(), Size::new(200.0, 400.0));
        let shot = p.capture(viewport).await.unwrap();
        assert_eq!((shot.width, shot.height), (200, 100));
    }

    #[tokio::test]
    async fn test_click_is_recorded() {
        let p = page();
        p.navigate("http://test/").await.unwrap();
        let btn = p.query_all(".btn", None).await.unwrap().remove(0);
        p.click_at(&btn, Point::new(11.0, 51.0)).await.unwrap();
        let clicks = p.clicks();
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0].point, Point::new(11.0, 51.0));
        assert!(p.call_history().contains(&"click:.btn".to_string()));
    }

    #[tokio::test]
    async fn test_without_document() {
        let p = page();
        assert!(p.viewport().await.is_err());
        assert!(p.query_all("body", None).await.is_err());
    }
}
