//! Real browser driver over the Chrome `DevTools` Protocol.
//!
//! Elements are tracked in a page-side registry (`window.__mirar`) keyed by
//! the [`ElementId`] handed out on first query, so a handle keeps pointing at
//! the same node after it is detached. Navigation drops the registry; old
//! handles then fail with a driver error.

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, Viewport,
};
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::HarnessConfig;
use crate::driver::{ElementHandle, ElementId, ElementState, PageDriver, Screenshot, Sibling, Size};
use crate::keyboard::{KeyInput, Modifier, Modifiers, SpecialKey};
use crate::locator::{BoundingBox, Point};
use crate::result::{MirarError, MirarResult};

/// Browser launch options
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Run without a window
    pub headless: bool,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserOptions {
    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

// Installed on demand by every script
const REGISTRY: &str = r"
const M = window.__mirar || (window.__mirar = {
  next: 1,
  els: new Map(),
  id(el) {
    for (const [k, v] of this.els) { if (v === el) return k; }
    const k = this.next++;
    this.els.set(k, el);
    return k;
  },
  get(k) {
    const el = this.els.get(k);
    if (!el) throw new Error('stale element handle #' + k);
    return el;
  },
});
";

const STATE: &str = r"
const r = el.getBoundingClientRect();
const cs = getComputedStyle(el);
let visible = el.isConnected && r.width > 0 && r.height > 0
  && cs.visibility !== 'hidden' && cs.display !== 'none' && cs.opacity !== '0';
const cx = r.left + r.width / 2, cy = r.top + r.height / 2;
for (let p = el.parentElement; visible && p; p = p.parentElement) {
  const o = getComputedStyle(p).overflow;
  if (o === 'visible') continue;
  const pr = p.getBoundingClientRect();
  if (cx < pr.left || cx >= pr.right || cy < pr.top || cy >= pr.bottom) visible = false;
}
let obscured = false;
if (visible && cx >= 0 && cy >= 0 && cx < innerWidth && cy < innerHeight) {
  const top = document.elementFromPoint(cx, cy);
  obscured = !!top && top !== el && !el.contains(top);
}
const attributes = {};
for (const a of el.attributes) attributes[a.name] = a.value;
const tag = el.tagName.toLowerCase();
const hasValue = 'value' in el && (tag === 'input' || tag === 'textarea' || tag === 'select');
const textual = tag === 'textarea' || (tag === 'input'
  && !['button', 'submit', 'reset', 'checkbox', 'radio', 'file', 'image', 'hidden'].includes(el.type));
return {
  tag,
  value: hasValue ? el.value : null,
  classes: Array.from(el.classList),
  attributes,
  visible,
  text: el.textContent || '',
  disabled: !!el.disabled,
  connected: el.isConnected,
  obscured,
  editable: (textual && !el.readOnly) || el.isContentEditable,
  focusable: el.tabIndex >= 0 || el.matches('input,select,textarea,button,a[href]'),
  focused: document.activeElement === el,
  bounds: { x: r.left + scrollX, y: r.top + scrollY, width: r.width, height: r.height },
  content_size: { width: el.scrollWidth, height: el.scrollHeight },
};
";

/// [`PageDriver`] backed by a chromium page
#[derive(Debug)]
pub struct CdpDriver {
    browser: Arc<Mutex<CdpBrowser>>,
    page: Arc<Mutex<CdpPage>>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

impl CdpDriver {
    /// Launch chromium sized to the configured viewport and open a blank page
    pub async fn launch(config: &HarnessConfig, options: BrowserOptions) -> MirarResult<Self> {
        let mut builder =
            CdpConfig::builder().window_size(config.viewport_width, config.viewport_height);
        if !options.headless {
            builder = builder.with_head();
        }
        if !options.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = options.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(MirarError::driver)?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config)
            .await
            .map_err(MirarError::driver)?;
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(MirarError::driver)?;
        tracing::info!(
            width = config.viewport_width,
            height = config.viewport_height,
            "browser launched"
        );
        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            page: Arc::new(Mutex::new(page)),
            handle,
        })
    }

    /// Close the browser
    pub async fn close(self) -> MirarResult<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(MirarError::driver)?;
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, body: &str) -> MirarResult<T> {
        let script = format!("(() => {{ {REGISTRY} {body} }})()");
        let page = self.page.lock().await;
        let result = page.evaluate(script).await.map_err(MirarError::driver)?;
        result.into_value().map_err(MirarError::driver)
    }

    /// Run `body` with `el` bound to the element behind `handle`
    async fn eval_on<T: DeserializeOwned>(
        &self,
        handle: &ElementHandle,
        body: &str,
    ) -> MirarResult<T> {
        self.eval(&format!("const el = M.get({}); {body}", handle.id().0))
            .await
    }

    async fn dispatch_key(
        &self,
        kind: DispatchKeyEventType,
        key: &str,
        text: Option<&str>,
        modifiers: Modifiers,
    ) -> MirarResult<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key)
            .modifiers(modifier_mask(modifiers));
        if let Some(text) = text {
            builder = builder.text(text);
        }
        let params = builder.build().map_err(MirarError::driver)?;
        let page = self.page.lock().await;
        page.execute(params).await.map_err(MirarError::driver)?;
        Ok(())
    }

    async fn keystroke(
        &self,
        key: &str,
        text: Option<&str>,
        modifiers: Modifiers,
    ) -> MirarResult<()> {
        let down = if text.is_some() {
            DispatchKeyEventType::KeyDown
        } else {
            DispatchKeyEventType::RawKeyDown
        };
        self.dispatch_key(down, key, text, modifiers).await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, key, None, modifiers)
            .await
    }

    async fn mouse(&self, kind: DispatchMouseEventType, x: f64, y: f64) -> MirarResult<()> {
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(MirarError::driver)?;
        let page = self.page.lock().await;
        page.execute(params).await.map_err(MirarError::driver)?;
        Ok(())
    }
}

/// CDP modifier bit field
fn modifier_mask(modifiers: Modifiers) -> i64 {
    [
        (Modifier::Alt, 1),
        (Modifier::Control, 2),
        (Modifier::Meta, 4),
        (Modifier::Shift, 8),
    ]
    .into_iter()
    .filter(|(m, _)| modifiers.contains(*m))
    .map(|(_, bit)| bit)
    .sum()
}

fn js_string(s: &str) -> MirarResult<String> {
    Ok(serde_json::to_string(s)?)
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> MirarResult<()> {
        let page = self.page.lock().await;
        page.goto(url).await.map_err(|e| MirarError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(url, "navigated");
        Ok(())
    }

    async fn query_all(
        &self,
        selector: &str,
        scope: Option<&ElementHandle>,
    ) -> MirarResult<Vec<ElementHandle>> {
        let root = scope.map_or_else(|| "document".to_string(), |s| format!("M.get({})", s.id().0));
        let ids: Vec<u64> = self
            .eval(&format!(
                "return Array.from({root}.querySelectorAll({})).map(el => M.id(el));",
                js_string(selector)?
            ))
            .await?;
        Ok(ids
            .into_iter()
            .map(|id| ElementHandle::new(ElementId(id), selector))
            .collect())
    }

    async fn sibling(
        &self,
        handle: &ElementHandle,
        direction: Sibling,
    ) -> MirarResult<Option<ElementHandle>> {
        let prop = match direction {
            Sibling::Previous => "previousElementSibling",
            Sibling::Next => "nextElementSibling",
        };
        let id: Option<u64> = self
            .eval_on(handle, &format!("const s = el.{prop}; return s ? M.id(s) : null;"))
            .await?;
        Ok(id.map(|id| ElementHandle::new(ElementId(id), handle.selector())))
    }

    async fn state(&self, handle: &ElementHandle) -> MirarResult<ElementState> {
        self.eval_on(handle, STATE).await
    }

    async fn press(&self, _handle: &ElementHandle, input: KeyInput) -> MirarResult<()> {
        match input {
            KeyInput::Char { ch, modifiers } => {
                let key = ch.to_string();
                let text = (!modifiers.is_shortcut()).then_some(key.as_str());
                self.keystroke(&key, text, modifiers).await
            }
            KeyInput::Key {
                key: SpecialKey::SelectAll,
                ..
            } => {
                self.eval::<bool>(
                    "const el = document.activeElement; \
                     if (el && el.select) { el.select(); return true; } return false;",
                )
                .await?;
                Ok(())
            }
            KeyInput::Key {
                key: SpecialKey::Enter,
                modifiers,
            } => self.keystroke("Enter", Some("\r"), modifiers).await,
            KeyInput::Key { key, modifiers } => {
                self.keystroke(key.dom_key(), None, modifiers).await
            }
            KeyInput::ModifierDown(modifier) => {
                self.dispatch_key(
                    DispatchKeyEventType::RawKeyDown,
                    modifier.dom_key(),
                    None,
                    Modifiers::NONE.with(modifier),
                )
                .await
            }
            KeyInput::ModifierUp(modifier) => {
                self.dispatch_key(
                    DispatchKeyEventType::KeyUp,
                    modifier.dom_key(),
                    None,
                    Modifiers::NONE,
                )
                .await
            }
        }
    }

    async fn click_at(&self, _handle: &ElementHandle, point: Point) -> MirarResult<()> {
        let viewport = self.viewport().await?;
        let (x, y) = (point.x - viewport.x, point.y - viewport.y);
        self.mouse(DispatchMouseEventType::MousePressed, x, y).await?;
        self.mouse(DispatchMouseEventType::MouseReleased, x, y).await
    }

    async fn focus(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.eval_on::<bool>(handle, "el.focus(); return true;")
            .await
            .map(drop)
    }

    async fn blur(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.eval_on::<bool>(handle, "el.blur(); return true;")
            .await
            .map(drop)
    }

    async fn clear(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.eval_on::<bool>(
            handle,
            "el.value = ''; \
             el.dispatchEvent(new Event('input', { bubbles: true })); \
             el.dispatchEvent(new Event('change', { bubbles: true })); \
             return true;",
        )
        .await
        .map(drop)
    }

    async fn submit(&self, handle: &ElementHandle) -> MirarResult<bool> {
        self.eval_on(
            handle,
            "const form = el.tagName === 'FORM' ? el : el.form || el.closest('form'); \
             if (!form) return false; \
             if (form.requestSubmit) { form.requestSubmit(); } \
             else if (form.dispatchEvent(new Event('submit', { bubbles: true, cancelable: true }))) { form.submit(); } \
             return true;",
        )
        .await
    }

    async fn scroll_into_view(&self, handle: &ElementHandle) -> MirarResult<()> {
        self.eval_on::<bool>(
            handle,
            "el.scrollIntoView({ block: 'start', inline: 'nearest' }); return true;",
        )
        .await
        .map(drop)
    }

    async fn viewport(&self) -> MirarResult<BoundingBox> {
        self.eval("return { x: scrollX, y: scrollY, width: innerWidth, height: innerHeight };")
            .await
    }

    async fn document_size(&self) -> MirarResult<Size> {
        self.eval(
            "const d = document.documentElement; \
             return { width: d.scrollWidth, height: d.scrollHeight };",
        )
        .await
    }

    async fn capture(&self, clip: BoundingBox) -> MirarResult<Screenshot> {
        if clip.width <= 0.0 || clip.height <= 0.0 {
            return Err(MirarError::Screenshot {
                message: format!("empty capture area {}x{}", clip.width, clip.height),
            });
        }
        let viewport = Viewport::builder()
            .x(clip.x)
            .y(clip.y)
            .width(clip.width)
            .height(clip.height)
            .scale(1.0)
            .build()
            .map_err(|e| MirarError::Screenshot { message: e })?;
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(viewport)
            .capture_beyond_viewport(true)
            .build();

        let page = self.page.lock().await;
        let response = page
            .execute(params)
            .await
            .map_err(|e| MirarError::Screenshot {
                message: e.to_string(),
            })?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(&response.data)
            .map_err(|e| MirarError::Screenshot {
                message: e.to_string(),
            })?;
        let image = image::load_from_memory(&data).map_err(|e| MirarError::Screenshot {
            message: format!("Failed to decode capture: {e}"),
        })?;
        Ok(Screenshot::new(data, image.width(), image.height()))
    }
}
