//! Locators and the selector resolver.
//!
//! A [`Locator`] says where to find elements: a CSS selector resolved against
//! the page, or a position (named anchor or pixel offset) that only means
//! something once an action has a target element in hand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::driver::{ElementHandle, PageDriver};
use crate::result::{MirarError, MirarResult};

/// A point in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Bounding box for an element, in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge (exclusive)
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge (exclusive)
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Get the center point
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Check if a point is inside this bounding box
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    /// Overlapping area of two boxes, if any
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Self::new(x, y, right - x, bottom - y))
    }

    /// Check whether the boxes overlap
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersection(other).is_some()
    }

    /// Same box moved by `(dx, dy)`
    #[must_use]
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// The nine anchor points of an element's box.
///
/// ```text
///  topLeft      top      topRight
///  left        center       right
///  bottomLeft  bottom  bottomRight
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NamedPoint {
    /// Top-left corner
    TopLeft,
    /// Middle of the top edge
    Top,
    /// Top-right corner
    TopRight,
    /// Middle of the left edge
    Left,
    /// Geometric center
    Center,
    /// Middle of the right edge
    Right,
    /// Bottom-left corner
    BottomLeft,
    /// Middle of the bottom edge
    Bottom,
    /// Bottom-right corner
    BottomRight,
}

impl NamedPoint {
    /// All anchors, row by row
    pub const ALL: [Self; 9] = [
        Self::TopLeft,
        Self::Top,
        Self::TopRight,
        Self::Left,
        Self::Center,
        Self::Right,
        Self::BottomLeft,
        Self::Bottom,
        Self::BottomRight,
    ];

    /// camelCase name of the anchor
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TopLeft => "topLeft",
            Self::Top => "top",
            Self::TopRight => "topRight",
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
            Self::BottomLeft => "bottomLeft",
            Self::Bottom => "bottom",
            Self::BottomRight => "bottomRight",
        }
    }

    /// Page point of this anchor inside `bounds`.
    ///
    /// Right and bottom anchors sit one pixel inside the edge so the point
    /// still belongs to the element.
    #[must_use]
    pub fn point_in(&self, bounds: &BoundingBox) -> Point {
        let left = bounds.x;
        let middle = bounds.x + (bounds.width / 2.0).floor();
        let right = bounds.x + (bounds.width - 1.0).max(0.0);
        let top = bounds.y;
        let center = bounds.y + (bounds.height / 2.0).floor();
        let bottom = bounds.y + (bounds.height - 1.0).max(0.0);

        let (x, y) = match self {
            Self::TopLeft => (left, top),
            Self::Top => (middle, top),
            Self::TopRight => (right, top),
            Self::Left => (left, center),
            Self::Center => (middle, center),
            Self::Right => (right, center),
            Self::BottomLeft => (left, bottom),
            Self::Bottom => (middle, bottom),
            Self::BottomRight => (right, bottom),
        };
        Point::new(x, y)
    }
}

impl fmt::Display for NamedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NamedPoint {
    type Err = MirarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| MirarError::InvalidLocator {
                locator: s.to_string(),
                message: "not a named position".to_string(),
            })
    }
}

/// Where to find one or more elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Locator {
    /// CSS selector (e.g. `.action-email`)
    Css(String),
    /// Named anchor inside the action's target
    Point(NamedPoint),
    /// Pixel offset from the target's top-left corner
    Coordinate {
        /// Horizontal offset
        x: i32,
        /// Vertical offset
        y: i32,
    },
}

impl Locator {
    /// Create a CSS locator
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create a named-anchor locator
    #[must_use]
    pub const fn point(point: NamedPoint) -> Self {
        Self::Point(point)
    }

    /// Create a pixel-offset locator
    #[must_use]
    pub const fn coordinate(x: i32, y: i32) -> Self {
        Self::Coordinate { x, y }
    }

    /// The CSS selector, if this is one
    #[must_use]
    pub fn as_css(&self) -> Option<&str> {
        match self {
            Self::Css(s) => Some(s),
            Self::Point(_) | Self::Coordinate { .. } => None,
        }
    }

    /// Page point this position locator designates inside `bounds`.
    ///
    /// CSS locators are not positions and yield `None`.
    #[must_use]
    pub fn point_in(&self, bounds: &BoundingBox) -> Option<Point> {
        match self {
            Self::Css(_) => None,
            Self::Point(p) => Some(p.point_in(bounds)),
            Self::Coordinate { x, y } => Some(Point::new(
                bounds.x + f64::from(*x),
                bounds.y + f64::from(*y),
            )),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => f.write_str(s),
            Self::Point(p) => write!(f, "{p}"),
            Self::Coordinate { x, y } => write!(f, "({x}, {y})"),
        }
    }
}

impl From<NamedPoint> for Locator {
    fn from(point: NamedPoint) -> Self {
        Self::Point(point)
    }
}

/// Outcome of resolving a locator
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Matched elements in document order
    Elements(Vec<ElementHandle>),
    /// Position locator, resolved later by the action that receives it
    Deferred(Locator),
}

impl Resolution {
    /// Matched elements; empty for deferred positions
    #[must_use]
    pub fn into_elements(self) -> Vec<ElementHandle> {
        match self {
            Self::Elements(handles) => handles,
            Self::Deferred(_) => Vec::new(),
        }
    }
}

/// Resolve `locator` against the current page, or within `scope`.
///
/// A CSS locator that matches nothing is a `NotFound` error unless `force`
/// is set, in which case the empty match is returned for the caller to skip.
pub async fn resolve(
    driver: &dyn PageDriver,
    locator: &Locator,
    scope: Option<&ElementHandle>,
    force: bool,
) -> MirarResult<Resolution> {
    let Some(selector) = locator.as_css() else {
        return Ok(Resolution::Deferred(locator.clone()));
    };

    let handles = driver.query_all(selector, scope).await?;
    tracing::debug!(selector, matched = handles.len(), "resolved locator");

    if handles.is_empty() && !force {
        let selector = match scope {
            Some(scope) => format!("{} {selector}", scope.selector()),
            None => selector.to_string(),
        };
        return Err(MirarError::NotFound {
            action: "get".to_string(),
            selector,
        });
    }
    Ok(Resolution::Elements(handles))
}
