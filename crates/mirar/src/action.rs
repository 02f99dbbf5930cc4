//! Action executor: type, click, focus, blur, clear, submit, scrollIntoView.
//!
//! Every action runs the same pre-flight for each target:
//!
//! 1. **Cardinality**: several handles need `multiple: true`; an empty
//!    subject (only reachable under `force`) skips the action with a warning.
//! 2. **Scroll**: a target outside the viewport is scrolled into view.
//! 3. **Actionability**: the element state is polled until it is attached,
//!    visible, enabled and uncovered, or the timeout elapses.
//!
//! `force: true` skips steps 2 and 3.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HarnessConfig;
use crate::driver::{ElementHandle, ElementState, PageDriver};
use crate::keyboard::{keystrokes, parse_keys};
use crate::locator::{Locator, NamedPoint};
use crate::result::{MirarError, MirarResult};

/// Per-action options. Unknown keys are ignored when deserialising.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionOptions {
    /// Skip actionability checks
    pub force: bool,
    /// Milliseconds to wait between keystrokes
    pub delay: Option<u64>,
    /// Allow acting on several elements
    pub multiple: bool,
}

impl ActionOptions {
    /// Default options
    #[must_use]
    pub const fn new() -> Self {
        Self {
            force: false,
            delay: None,
            multiple: false,
        }
    }

    /// Set `force`
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the keystroke delay
    #[must_use]
    pub const fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    /// Set `multiple`
    #[must_use]
    pub const fn with_multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }
}

/// Runs actions against a [`PageDriver`]
#[derive(Clone, Copy)]
pub struct ActionExecutor<'a> {
    driver: &'a dyn PageDriver,
    timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for ActionExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<'a> ActionExecutor<'a> {
    /// Executor with the config's timeout and poll interval
    #[must_use]
    pub fn new(driver: &'a dyn PageDriver, config: &HarnessConfig) -> Self {
        Self {
            driver,
            timeout: config.action_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Override the actionability timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn check_cardinality(
        action: &str,
        handles: &[ElementHandle],
        options: &ActionOptions,
    ) -> MirarResult<bool> {
        match handles {
            [] => {
                tracing::warn!(action, "no element to act on, skipping");
                Ok(false)
            }
            [_] => Ok(true),
            [first, ..] if options.multiple => {
                tracing::debug!(
                    action,
                    count = handles.len(),
                    selector = first.selector(),
                    "acting on multiple elements"
                );
                Ok(true)
            }
            [first, ..] => Err(MirarError::AmbiguousTarget {
                action: action.to_string(),
                selector: first.selector().to_string(),
                count: handles.len(),
            }),
        }
    }

    /// Scroll into view if needed, then wait until the element is actionable
    async fn prepare(
        &self,
        action: &str,
        handle: &ElementHandle,
        options: &ActionOptions,
    ) -> MirarResult<ElementState> {
        if options.force {
            return self.driver.state(handle).await;
        }

        let state = self.driver.state(handle).await?;
        if state.connected {
            let viewport = self.driver.viewport().await?;
            if !state.bounds.intersects(&viewport) {
                tracing::debug!(action, selector = handle.selector(), "scrolling into view");
                self.driver.scroll_into_view(handle).await?;
            }
        }

        let start = Instant::now();
        loop {
            let state = self.driver.state(handle).await?;
            let Some(reason) = state.actionability_issue() else {
                return Ok(state);
            };
            if start.elapsed() >= self.timeout {
                return Err(MirarError::Actionability {
                    action: action.to_string(),
                    selector: handle.selector().to_string(),
                    reason: reason.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            tracing::trace!(
                action,
                selector = handle.selector(),
                reason,
                "waiting for actionability"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Type `text` into each target, one keystroke at a time
    pub async fn type_text(
        &self,
        handles: &[ElementHandle],
        text: &str,
        options: &ActionOptions,
    ) -> MirarResult<Vec<ElementHandle>> {
        let inputs = keystrokes(&parse_keys(text)?);
        if !Self::check_cardinality("type", handles, options)? {
            return Ok(handles.to_vec());
        }
        let delay = options.delay.map(Duration::from_millis);

        for handle in handles {
            let state = self.prepare("type", handle, options).await?;
            if !state.editable && !options.force {
                return Err(MirarError::NotEditable {
                    action: "type".to_string(),
                    selector: handle.selector().to_string(),
                });
            }
            if !state.focused {
                self.driver.focus(handle).await?;
            }

            let mut first = true;
            for input in &inputs {
                if input.is_keystroke() {
                    if let Some(delay) = delay.filter(|_| !first) {
                        tokio::time::sleep(delay).await;
                    }
                    first = false;
                }
                tracing::debug!(selector = handle.selector(), ?input, "key");
                self.driver.press(handle, *input).await?;
            }
        }
        Ok(handles.to_vec())
    }

    /// Click each target at `position`, or at its centre.
    ///
    /// `position` must be a named anchor or a pixel offset.
    pub async fn click(
        &self,
        handles: &[ElementHandle],
        position: Option<&Locator>,
        options: &ActionOptions,
    ) -> MirarResult<Vec<ElementHandle>> {
        if let Some(css @ Locator::Css(_)) = position {
            return Err(MirarError::InvalidLocator {
                locator: css.to_string(),
                message: "a click position must be a named point or a coordinate".to_string(),
            });
        }
        if !Self::check_cardinality("click", handles, options)? {
            return Ok(handles.to_vec());
        }

        for handle in handles {
            let state = self.prepare("click", handle, options).await?;
            let point = position
                .and_then(|p| p.point_in(&state.bounds))
                .unwrap_or_else(|| NamedPoint::Center.point_in(&state.bounds));
            tracing::debug!(selector = handle.selector(), x = point.x, y = point.y, "click");
            self.driver.click_at(handle, point).await?;
        }
        Ok(handles.to_vec())
    }

    /// Focus each target
    pub async fn focus(
        &self,
        handles: &[ElementHandle],
        options: &ActionOptions,
    ) -> MirarResult<Vec<ElementHandle>> {
        if !Self::check_cardinality("focus", handles, options)? {
            return Ok(handles.to_vec());
        }
        for handle in handles {
            let state = self.prepare("focus", handle, options).await?;
            if !state.focusable && !options.force {
                tracing::warn!(
                    selector = handle.selector(),
                    "focus: element cannot take focus, ignoring"
                );
                continue;
            }
            tracing::debug!(selector = handle.selector(), "focus");
            self.driver.focus(handle).await?;
        }
        Ok(handles.to_vec())
    }

    /// Blur each target
    pub async fn blur(
        &self,
        handles: &[ElementHandle],
        options: &ActionOptions,
    ) -> MirarResult<Vec<ElementHandle>> {
        if !Self::check_cardinality("blur", handles, options)? {
            return Ok(handles.to_vec());
        }
        for handle in handles {
            let state = self.prepare("blur", handle, options).await?;
            if !state.focusable && !options.force {
                tracing::warn!(
                    selector = handle.selector(),
                    "blur: element cannot take focus, ignoring"
                );
                continue;
            }
            tracing::debug!(selector = handle.selector(), "blur");
            self.driver.blur(handle).await?;
        }
        Ok(handles.to_vec())
    }

    /// Empty the value of each target
    pub async fn clear(
        &self,
        handles: &[ElementHandle],
        options: &ActionOptions,
    ) -> MirarResult<Vec<ElementHandle>> {
        if !Self::check_cardinality("clear", handles, options)? {
            return Ok(handles.to_vec());
        }
        for handle in handles {
            let state = self.prepare("clear", handle, options).await?;
            if state.value.is_none() || (!state.editable && !options.force) {
                return Err(MirarError::NotEditable {
                    action: "clear".to_string(),
                    selector: handle.selector().to_string(),
                });
            }
            tracing::debug!(selector = handle.selector(), "clear");
            self.driver.clear(handle).await?;
        }
        Ok(handles.to_vec())
    }

    /// Submit the form of each target
    pub async fn submit(
        &self,
        handles: &[ElementHandle],
        options: &ActionOptions,
    ) -> MirarResult<Vec<ElementHandle>> {
        if !Self::check_cardinality("submit", handles, options)? {
            return Ok(handles.to_vec());
        }
        for handle in handles {
            tracing::debug!(selector = handle.selector(), "submit");
            if !self.driver.submit(handle).await? {
                return Err(MirarError::NoForm {
                    selector: handle.selector().to_string(),
                });
            }
        }
        Ok(handles.to_vec())
    }

    /// Scroll each target into view. Visibility is not required.
    pub async fn scroll_into_view(
        &self,
        handles: &[ElementHandle],
        options: &ActionOptions,
    ) -> MirarResult<Vec<ElementHandle>> {
        if !Self::check_cardinality("scrollIntoView", handles, options)? {
            return Ok(handles.to_vec());
        }
        for handle in handles {
            tracing::debug!(selector = handle.selector(), "scrollIntoView");
            self.driver.scroll_into_view(handle).await?;
        }
        Ok(handles.to_vec())
    }
}
