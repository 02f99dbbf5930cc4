//! Test context and the fluent [`Subject`] chain.
//!
//! A test body receives a [`TestContext`]. Queries return a [`Subject`]: an
//! immutable carrier of element handles. Every action, traversal or
//! assertion consumes the subject and returns the next one, so a chain reads
//! like the interaction it performs:
//!
//! ```ignore
//! ctx.get(".action-email").await?
//!     .type_text("fake@email.com").await?
//!     .should(Expectation::have_value("fake@email.com")).await?;
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::action::{ActionExecutor, ActionOptions};
use crate::assertion::Expectation;
use crate::checkpoint::{Checkpoint, CheckpointRecorder};
use crate::config::HarnessConfig;
use crate::driver::{ElementHandle, ElementState, PageDriver, Sibling};
use crate::locator::{resolve, Locator};
use crate::result::{MirarError, MirarResult};

/// Everything a test body can reach: the page and the visual session
pub struct TestContext {
    test_name: String,
    driver: Arc<dyn PageDriver>,
    config: HarnessConfig,
    recorder: Mutex<CheckpointRecorder>,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("test_name", &self.test_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TestContext {
    pub(crate) fn new(
        test_name: impl Into<String>,
        driver: Arc<dyn PageDriver>,
        config: HarnessConfig,
        recorder: CheckpointRecorder,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            driver,
            config,
            recorder: Mutex::new(recorder),
        }
    }

    /// Name of the running test
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// The page driver
    #[must_use]
    pub fn driver(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    /// Harness configuration
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn executor(&self) -> ActionExecutor<'_> {
        ActionExecutor::new(self.driver.as_ref(), &self.config)
    }

    /// Every element matching `selector`; none is a `NotFound` error
    pub async fn get(&self, selector: &str) -> MirarResult<Subject<'_>> {
        self.get_with(selector, ActionOptions::new()).await
    }

    /// Like [`get`](Self::get); with `force` an empty match is allowed and
    /// the options carry over to the next action
    pub async fn get_with(
        &self,
        selector: &str,
        options: ActionOptions,
    ) -> MirarResult<Subject<'_>> {
        let locator = Locator::css(selector);
        let handles = resolve(self.driver(), &locator, None, options.force)
            .await?
            .into_elements();
        Ok(Subject {
            ctx: self,
            handles,
            selector: selector.to_string(),
            options,
        })
    }

    /// Record a visual checkpoint
    pub async fn check_window(&self, checkpoint: &Checkpoint) -> MirarResult<()> {
        self.recorder
            .lock()
            .await
            .capture(self.driver(), checkpoint)
            .await
    }

    pub(crate) fn into_recorder(self) -> CheckpointRecorder {
        self.recorder.into_inner()
    }
}

/// Elements produced by the previous step of a chain
#[must_use]
#[derive(Debug)]
pub struct Subject<'a> {
    ctx: &'a TestContext,
    handles: Vec<ElementHandle>,
    selector: String,
    options: ActionOptions,
}

impl<'a> Subject<'a> {
    fn next_step(self, handles: Vec<ElementHandle>, selector: String) -> Self {
        Self {
            ctx: self.ctx,
            handles,
            selector,
            options: ActionOptions::new(),
        }
    }

    fn same(self, handles: Vec<ElementHandle>) -> Self {
        let selector = self.selector.clone();
        self.next_step(handles, selector)
    }

    /// Handles in document order
    #[must_use]
    pub fn handles(&self) -> &[ElementHandle] {
        &self.handles
    }

    /// Selector chain that produced the subject
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the subject has no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Options applied to the next action only
    pub const fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = options;
        self
    }

    /// Fresh state of every element
    pub async fn states(&self) -> MirarResult<Vec<ElementState>> {
        let mut states = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            states.push(self.ctx.driver().state(handle).await?);
        }
        Ok(states)
    }

    /// Descendants matching `selector`
    pub async fn find(self, selector: &str) -> MirarResult<Self> {
        let locator = Locator::css(selector);
        let mut found = Vec::new();
        for scope in &self.handles {
            let handles = resolve(self.ctx.driver(), &locator, Some(scope), true)
                .await?
                .into_elements();
            for handle in handles {
                if !found.contains(&handle) {
                    found.push(handle);
                }
            }
        }
        let chain = format!("{} {selector}", self.selector);
        if found.is_empty() {
            return Err(MirarError::NotFound {
                action: "find".to_string(),
                selector: chain,
            });
        }
        Ok(self.next_step(found, chain))
    }

    async fn sibling(self, direction: Sibling, action: &str) -> MirarResult<Self> {
        let mut siblings = Vec::new();
        for handle in &self.handles {
            if let Some(sibling) = self.ctx.driver().sibling(handle, direction).await? {
                siblings.push(sibling);
            }
        }
        let chain = format!("{} ({action})", self.selector);
        if siblings.is_empty() {
            return Err(MirarError::NotFound {
                action: action.to_string(),
                selector: chain,
            });
        }
        Ok(self.next_step(siblings, chain))
    }

    /// Previous element sibling of each element
    pub async fn prev(self) -> MirarResult<Self> {
        self.sibling(Sibling::Previous, "prev").await
    }

    /// Next element sibling of each element
    pub async fn next(self) -> MirarResult<Self> {
        self.sibling(Sibling::Next, "next").await
    }

    /// Type `text`, with `{key}` tokens for special keys and modifiers
    pub async fn type_text(self, text: &str) -> MirarResult<Self> {
        let handles = self
            .ctx
            .executor()
            .type_text(&self.handles, text, &self.options)
            .await?;
        Ok(self.same(handles))
    }

    /// Click the centre of each element
    pub async fn click(self) -> MirarResult<Self> {
        let handles = self
            .ctx
            .executor()
            .click(&self.handles, None, &self.options)
            .await?;
        Ok(self.same(handles))
    }

    /// Click at a named point or pixel offset
    pub async fn click_at(self, position: impl Into<Locator>) -> MirarResult<Self> {
        let position = position.into();
        let handles = self
            .ctx
            .executor()
            .click(&self.handles, Some(&position), &self.options)
            .await?;
        Ok(self.same(handles))
    }

    /// Focus the element
    pub async fn focus(self) -> MirarResult<Self> {
        let handles = self.ctx.executor().focus(&self.handles, &self.options).await?;
        Ok(self.same(handles))
    }

    /// Blur the element
    pub async fn blur(self) -> MirarResult<Self> {
        let handles = self.ctx.executor().blur(&self.handles, &self.options).await?;
        Ok(self.same(handles))
    }

    /// Empty the element's value
    pub async fn clear(self) -> MirarResult<Self> {
        let handles = self.ctx.executor().clear(&self.handles, &self.options).await?;
        Ok(self.same(handles))
    }

    /// Submit the element's form
    pub async fn submit(self) -> MirarResult<Self> {
        let handles = self.ctx.executor().submit(&self.handles, &self.options).await?;
        Ok(self.same(handles))
    }

    /// Scroll the element into view
    pub async fn scroll_into_view(self) -> MirarResult<Self> {
        let handles = self
            .ctx
            .executor()
            .scroll_into_view(&self.handles, &self.options)
            .await?;
        Ok(self.same(handles))
    }

    /// Assert `expectation` on every element
    pub async fn should(self, expectation: Expectation) -> MirarResult<Self> {
        expectation.verify(self.ctx.driver(), &self.handles).await?;
        let handles = self.handles.clone();
        Ok(self.same(handles))
    }
}
