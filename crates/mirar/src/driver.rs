//! PageDriver - the browser seam.
//!
//! The harness never talks to a browser directly. Everything it needs from
//! the page (queries, state snapshots, synthetic input, captures) goes
//! through [`PageDriver`], so the same test code runs against the in-memory
//! [`SimulatedPage`](crate::SimulatedPage) or a real browser over CDP.

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::keyboard::KeyInput;
use crate::locator::{BoundingBox, Point};
use crate::result::{MirarError, MirarResult};

/// Driver-assigned element identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable reference to a live element.
///
/// Carries the selector it was found with so failures can name it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    id: ElementId,
    selector: String,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: ElementId, selector: impl Into<String>) -> Self {
        Self {
            id,
            selector: selector.into(),
        }
    }

    /// Driver identity
    #[must_use]
    pub const fn id(&self) -> ElementId {
        self.id
    }

    /// Selector this handle was resolved from
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }
}

/// Direction for sibling traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sibling {
    /// Previous element sibling
    Previous,
    /// Next element sibling
    Next,
}

/// Width and height pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Size {
    /// Create a new size
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Snapshot of an element at the moment it was read.
///
/// Never cached: every query asks the driver again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    /// Tag name, lowercase
    pub tag: String,
    /// Form value (`None` for elements without one)
    pub value: Option<String>,
    /// Class list in attribute order
    pub classes: Vec<String>,
    /// All attributes, `class` and `id` included
    pub attributes: BTreeMap<String, String>,
    /// Rendered and not clipped away
    pub visible: bool,
    /// Text content of the subtree
    pub text: String,
    /// Disabled form control
    pub disabled: bool,
    /// Still attached to the document
    pub connected: bool,
    /// Another element sits on top of its center
    pub obscured: bool,
    /// Accepts typed text
    pub editable: bool,
    /// Can receive focus
    pub focusable: bool,
    /// Currently focused
    pub focused: bool,
    /// Box in page coordinates
    pub bounds: BoundingBox,
    /// Full scrollable extent of the element's content
    pub content_size: Size,
}

impl ElementState {
    /// Reason the element cannot be acted on right now, if any
    #[must_use]
    pub fn actionability_issue(&self) -> Option<&'static str> {
        if !self.connected {
            Some("detached from the document")
        } else if !self.visible {
            Some("not visible")
        } else if self.disabled {
            Some("disabled")
        } else if self.obscured {
            Some("covered by another element")
        } else {
            None
        }
    }

    /// Whether the class list contains `class`
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Attribute value
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// PNG capture with its dimensions
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// PNG data
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Screenshot {
    /// Create a new screenshot
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Encode an in-memory image as a PNG screenshot
    pub fn from_image(image: &DynamicImage) -> MirarResult<Self> {
        let rgba = image.to_rgba8();
        let (width, height) = image.dimensions();
        let mut data = Vec::new();
        image::codecs::png::PngEncoder::new(&mut data)
            .write_image(rgba.as_raw(), width, height, image::ExtendedColorType::Rgba8)
            .map_err(|e| MirarError::Screenshot {
                message: format!("Failed to encode capture: {e}"),
            })?;
        Ok(Self::new(data, width, height))
    }

    /// Decode the PNG data
    pub fn decode(&self) -> MirarResult<DynamicImage> {
        image::load_from_memory(&self.data).map_err(|e| MirarError::Screenshot {
            message: format!("Failed to decode capture: {e}"),
        })
    }

    /// Get the size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Browser automation seam
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url`, replacing the current document
    async fn navigate(&self, url: &str) -> MirarResult<()>;

    /// All matches of `selector` in document order, within `scope` if given
    async fn query_all(
        &self,
        selector: &str,
        scope: Option<&ElementHandle>,
    ) -> MirarResult<Vec<ElementHandle>>;

    /// Previous or next element sibling
    async fn sibling(
        &self,
        handle: &ElementHandle,
        direction: Sibling,
    ) -> MirarResult<Option<ElementHandle>>;

    /// Fresh state snapshot
    async fn state(&self, handle: &ElementHandle) -> MirarResult<ElementState>;

    /// Dispatch one keystroke to the element
    async fn press(&self, handle: &ElementHandle, input: KeyInput) -> MirarResult<()>;

    /// Mouse click at a page point
    async fn click_at(&self, handle: &ElementHandle, point: Point) -> MirarResult<()>;

    /// Move focus to the element
    async fn focus(&self, handle: &ElementHandle) -> MirarResult<()>;

    /// Remove focus from the element
    async fn blur(&self, handle: &ElementHandle) -> MirarResult<()>;

    /// Empty the element's value
    async fn clear(&self, handle: &ElementHandle) -> MirarResult<()>;

    /// Submit the element's form; `false` when there is no form to submit
    async fn submit(&self, handle: &ElementHandle) -> MirarResult<bool>;

    /// Scroll ancestors and window until the element meets the viewport
    async fn scroll_into_view(&self, handle: &ElementHandle) -> MirarResult<()>;

    /// Visible part of the document, in page coordinates
    async fn viewport(&self) -> MirarResult<BoundingBox>;

    /// Full document size
    async fn document_size(&self) -> MirarResult<Size>;

    /// Capture `clip` (page coordinates) as PNG
    async fn capture(&self, clip: BoundingBox) -> MirarResult<Screenshot>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn state() -> ElementState {
        ElementState {
            tag: "input".to_string(),
            value: Some(String::new()),
            classes: vec!["form-control".to_string(), "action-email".to_string()],
            attributes: BTreeMap::from([("type".to_string(), "email".to_string())]),
            visible: true,
            text: String::new(),
            disabled: false,
            connected: true,
            obscured: false,
            editable: true,
            focusable: true,
            focused: false,
            bounds: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            content_size: Size::new(10.0, 10.0),
        }
    }

    #[test]
    fn test_actionable_state() {
        assert_eq!(state().actionability_issue(), None);
    }

    #[test]
    fn test_actionability_reasons_in_priority_order() {
        let mut s = state();
        s.disabled = true;
        s.visible = false;
        assert_eq!(s.actionability_issue(), Some("not visible"));
        s.connected = false;
        assert_eq!(s.actionability_issue(), Some("detached from the document"));
    }

    #[test]
    fn test_class_and_attribute_lookup() {
        let s = state();
        assert!(s.has_class("action-email"));
        assert!(!s.has_class("action"));
        assert_eq!(s.attribute("type"), Some("email"));
        assert_eq!(s.attribute("style"), None);
    }

    #[test]
    fn test_handle_accessors() {
        let h = ElementHandle::new(ElementId(7), ".btn");
        assert_eq!(h.id(), ElementId(7));
        assert_eq!(h.selector(), ".btn");
        assert_eq!(h.id().to_string(), "#7");
    }

    #[test]
    fn test_screenshot_png_roundtrip() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            3,
            2,
            image::Rgba([1, 2, 3, 255]),
        ));
        let shot = Screenshot::from_image(&img).unwrap();
        assert_eq!((shot.width, shot.height), (3, 2));
        assert!(shot.size_bytes() > 0);
        assert_eq!(shot.decode().unwrap().dimensions(), (3, 2));
    }
}
