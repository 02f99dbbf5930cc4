//! In-memory document model behind [`SimulatedPage`](super::SimulatedPage).
//!
//! Layout is absolute: every element carries its box in document coordinates
//! as if no container were scrolled. Scroll offsets of scrollable containers
//! and of the window are applied when geometry is read.

use std::collections::BTreeMap;

use super::selector::{ElementLike, SelectorList, Tree};
use crate::driver::Size;
use crate::keyboard::{KeyInput, SpecialKey};
use crate::locator::{BoundingBox, Point};

/// DOM events that can trigger scripted reactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomEvent {
    /// Element gained focus
    Focus,
    /// Element lost focus
    Blur,
    /// Form was submitted
    Submit,
    /// Element was clicked
    Click,
}

/// Element a reaction applies to, relative to the event target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relative {
    /// The event target itself
    This,
    /// Previous element sibling
    Previous,
    /// Next element sibling
    Next,
    /// Parent element
    Parent,
}

/// Page script stand-in: a state change run when an event fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Add a class
    AddClass {
        /// Affected element
        target: Relative,
        /// Class to add
        class: String,
    },
    /// Set an attribute
    SetAttribute {
        /// Affected element
        target: Relative,
        /// Attribute name
        name: String,
        /// Attribute value
        value: String,
    },
    /// Replace own text
    SetText {
        /// Affected element
        target: Relative,
        /// New text
        text: String,
    },
    /// Make a hidden element visible
    Show {
        /// Affected element
        target: Relative,
    },
}

impl Reaction {
    /// Add `class` to `target`
    #[must_use]
    pub fn add_class(target: Relative, class: impl Into<String>) -> Self {
        Self::AddClass {
            target,
            class: class.into(),
        }
    }

    /// Set attribute `name` on `target`
    #[must_use]
    pub fn set_attribute(
        target: Relative,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::SetAttribute {
            target,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Replace the text of `target`
    #[must_use]
    pub fn set_text(target: Relative, text: impl Into<String>) -> Self {
        Self::SetText {
            target,
            text: text.into(),
        }
    }

    /// Unhide `target`
    #[must_use]
    pub const fn show(target: Relative) -> Self {
        Self::Show { target }
    }

    const fn target(&self) -> Relative {
        match self {
            Self::AddClass { target, .. }
            | Self::SetAttribute { target, .. }
            | Self::SetText { target, .. }
            | Self::Show { target } => *target,
        }
    }
}

/// Declarative element description used to build a [`Document`]
#[derive(Debug, Clone)]
pub struct ElementSpec {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    value: Option<String>,
    text: String,
    bounds: BoundingBox,
    hidden: bool,
    transparent: bool,
    disabled: bool,
    scroll_content: Option<Size>,
    reactions: Vec<(DomEvent, Reaction)>,
    children: Vec<ElementSpec>,
}

impl ElementSpec {
    /// New element; `input` and `textarea` start with an empty value
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into().to_ascii_lowercase();
        let value = matches!(tag.as_str(), "input" | "textarea").then(String::new);
        Self {
            tag,
            id: None,
            classes: Vec::new(),
            attributes: BTreeMap::new(),
            value,
            text: String::new(),
            bounds: BoundingBox::new(0.0, 0.0, 0.0, 0.0),
            hidden: false,
            transparent: false,
            disabled: false,
            scroll_content: None,
            reactions: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set the `id`
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add classes (space separated)
    #[must_use]
    pub fn class(mut self, classes: &str) -> Self {
        self.classes
            .extend(classes.split_whitespace().map(str::to_string));
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the initial value
    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Place the box in document coordinates
    #[must_use]
    pub const fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bounds = BoundingBox::new(x, y, width, height);
        self
    }

    /// `display: none`
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// `opacity: 0`
    #[must_use]
    pub const fn transparent(mut self) -> Self {
        self.transparent = true;
        self
    }

    /// Disabled form control
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Make this a scroll container whose content measures `width`×`height`
    #[must_use]
    pub const fn scrollable(mut self, width: f64, height: f64) -> Self {
        self.scroll_content = Some(Size::new(width, height));
        self
    }

    /// Run `reaction` when `event` fires on this element
    #[must_use]
    pub fn on(mut self, event: DomEvent, reaction: Reaction) -> Self {
        self.reactions.push((event, reaction));
        self
    }

    /// Append a child
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Self>) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) tag: String,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attributes: BTreeMap<String, String>,
    pub(crate) value: Option<String>,
    pub(crate) text: String,
    pub(crate) bounds: BoundingBox,
    pub(crate) hidden: bool,
    pub(crate) transparent: bool,
    pub(crate) disabled: bool,
    pub(crate) connected: bool,
    pub(crate) scroll_content: Option<Size>,
    pub(crate) scroll_offset: Point,
    reactions: Vec<(DomEvent, Reaction)>,
    // Caret and selection count chars, not bytes
    caret: usize,
    selection: Option<(usize, usize)>,
}

impl Node {
    pub(crate) fn is_editable(&self) -> bool {
        if self.value.is_none() {
            return false;
        }
        match self.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.attributes.get("type").map(String::as_str),
                Some("checkbox" | "radio" | "submit" | "button" | "reset" | "image" | "hidden")
            ),
            _ => false,
        }
    }

    pub(crate) fn is_focusable(&self) -> bool {
        matches!(
            self.tag.as_str(),
            "input" | "textarea" | "button" | "select"
        ) || (self.tag == "a" && self.attributes.contains_key("href"))
            || self.attributes.contains_key("tabindex")
    }

    /// Attributes as the browser would report them
    pub(crate) fn all_attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = self.attributes.clone();
        if let Some(id) = &self.id {
            attributes.insert("id".to_string(), id.clone());
        }
        if !self.classes.is_empty() {
            attributes.insert("class".to_string(), self.classes.join(" "));
        }
        if self.disabled {
            attributes.insert("disabled".to_string(), String::new());
        }
        attributes
    }

    fn char_len(&self) -> usize {
        self.value.as_deref().map_or(0, |v| v.chars().count())
    }

    fn replace_range(&mut self, start: usize, end: usize, insert: &str) {
        let Some(value) = self.value.as_mut() else {
            return;
        };
        let mut chars: Vec<char> = value.chars().collect();
        let end = end.min(chars.len());
        let start = start.min(end);
        chars.splice(start..end, insert.chars());
        *value = chars.into_iter().collect();
        self.caret = start + insert.chars().count();
        self.selection = None;
    }

    fn selected_or(&self, start: usize, end: usize) -> (usize, usize) {
        self.selection.unwrap_or((start, end))
    }
}

impl ElementLike for Node {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn element_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => self.id.clone(),
            "class" => (!self.classes.is_empty()).then(|| self.classes.join(" ")),
            _ => self.attributes.get(name).cloned(),
        }
    }
}

/// A recorded mouse click
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickRecord {
    /// Index of the clicked element
    pub element: usize,
    /// Page point of the click
    pub point: Point,
}

/// Simulated document: element tree, focus, scroll and input history
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) nodes: Vec<Node>,
    size: Size,
    viewport: Size,
    window_scroll: Point,
    focused: Option<usize>,
    clicks: Vec<ClickRecord>,
}

impl Tree for Document {
    type Element = Node;

    fn element(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    fn parent(&self, index: usize) -> Option<usize> {
        self.nodes[index].parent
    }
}

impl Document {
    /// Build a document from its root element (usually `body`)
    #[must_use]
    pub fn new(root: ElementSpec, size: Size) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            size,
            viewport: size,
            window_scroll: Point::new(0.0, 0.0),
            focused: None,
            clicks: Vec::new(),
        };
        doc.insert(root, None);
        doc
    }

    // Pre-order insertion keeps node indices in document order
    fn insert(&mut self, el: ElementSpec, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        let caret = el.value.as_deref().map_or(0, |v| v.chars().count());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            tag: el.tag,
            id: el.id,
            classes: el.classes,
            attributes: el.attributes,
            value: el.value,
            text: el.text,
            bounds: el.bounds,
            hidden: el.hidden,
            transparent: el.transparent,
            disabled: el.disabled,
            connected: true,
            scroll_content: el.scroll_content,
            scroll_offset: Point::new(0.0, 0.0),
            reactions: el.reactions,
            caret,
            selection: None,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(index);
        }
        for child in el.children {
            self.insert(child, Some(index));
        }
        index
    }

    /// Full document size
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    /// Set the window size
    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
    }

    /// Visible window rectangle in page coordinates
    #[must_use]
    pub fn viewport_rect(&self) -> BoundingBox {
        BoundingBox::new(
            self.window_scroll.x,
            self.window_scroll.y,
            self.viewport.width,
            self.viewport.height,
        )
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the document has no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Currently focused element
    #[must_use]
    pub const fn focused(&self) -> Option<usize> {
        self.focused
    }

    /// Clicks in dispatch order
    #[must_use]
    pub fn clicks(&self) -> &[ClickRecord] {
        &self.clicks
    }

    pub(crate) fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index)
    }

    /// Connected elements matching `selector`, in document order
    pub(crate) fn query(&self, selector: &SelectorList, scope: Option<usize>) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].connected)
            .filter(|&i| scope.map_or(true, |s| i != s && self.is_ancestor(s, i)))
            .filter(|&i| selector.matches(self, i))
            .collect()
    }

    fn is_ancestor(&self, ancestor: usize, node: usize) -> bool {
        let mut current = self.nodes[node].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.nodes[p].parent;
        }
        false
    }

    fn ancestors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[node].parent, move |&p| self.nodes[p].parent)
    }

    /// Previous or next sibling
    pub(crate) fn sibling(&self, node: usize, next: bool) -> Option<usize> {
        let parent = self.nodes[node].parent?;
        let siblings = &self.nodes[parent].children;
        let pos = siblings.iter().position(|&c| c == node)?;
        let connected = |c: &usize| self.nodes[*c].connected;
        if next {
            siblings[pos + 1..].iter().copied().find(connected)
        } else {
            siblings[..pos].iter().rev().copied().find(connected)
        }
    }

    /// Own text plus the text of every descendant
    pub(crate) fn text_content(&self, node: usize) -> String {
        let n = &self.nodes[node];
        let mut text = n.text.clone();
        for &child in &n.children {
            if self.nodes[child].connected {
                text.push_str(&self.text_content(child));
            }
        }
        text
    }

    /// Box after applying ancestor container scroll offsets
    pub(crate) fn layout_box(&self, node: usize) -> BoundingBox {
        self.ancestors(node).fold(self.nodes[node].bounds, |b, a| {
            let offset = self.nodes[a].scroll_offset;
            b.translate(-offset.x, -offset.y)
        })
    }

    /// Part of the box not clipped by scroll containers
    pub(crate) fn clipped_box(&self, node: usize) -> Option<BoundingBox> {
        let mut visible = self.layout_box(node);
        for a in self.ancestors(node) {
            if self.nodes[a].scroll_content.is_some() {
                visible = visible.intersection(&self.layout_box(a))?;
            }
        }
        Some(visible)
    }

    pub(crate) fn is_visible(&self, node: usize) -> bool {
        let n = &self.nodes[node];
        if !n.connected || n.hidden || n.transparent {
            return false;
        }
        if n.bounds.width <= 0.0 || n.bounds.height <= 0.0 {
            return false;
        }
        if self.ancestors(node).any(|a| self.nodes[a].hidden) {
            return false;
        }
        self.clipped_box(node).is_some()
    }

    /// A later, unrelated, visible element covers the center of `node`
    pub(crate) fn is_obscured(&self, node: usize) -> bool {
        let Some(target) = self.clipped_box(node) else {
            return false;
        };
        let center = target.center();
        (node + 1..self.nodes.len())
            .filter(|&other| !self.is_ancestor(node, other) && !self.is_ancestor(other, node))
            .filter(|&other| self.is_visible(other))
            .any(|other| {
                self.clipped_box(other)
                    .is_some_and(|b| b.contains(&center))
            })
    }

    fn relative(&self, node: usize, target: Relative) -> Option<usize> {
        match target {
            Relative::This => Some(node),
            Relative::Previous => self.sibling(node, false),
            Relative::Next => self.sibling(node, true),
            Relative::Parent => self.nodes[node].parent,
        }
    }

    fn fire(&mut self, node: usize, event: DomEvent) {
        let reactions: Vec<Reaction> = self.nodes[node]
            .reactions
            .iter()
            .filter(|(e, _)| *e == event)
            .map(|(_, r)| r.clone())
            .collect();
        for reaction in reactions {
            self.apply(node, reaction);
        }
    }

    fn apply(&mut self, node: usize, reaction: Reaction) {
        let Some(index) = self.relative(node, reaction.target()) else {
            return;
        };
        let n = &mut self.nodes[index];
        match reaction {
            Reaction::AddClass { class, .. } => {
                if !n.classes.contains(&class) {
                    n.classes.push(class);
                }
            }
            Reaction::SetAttribute { name, value, .. } => {
                n.attributes.insert(name, value);
            }
            Reaction::SetText { text, .. } => n.text = text,
            Reaction::Show { .. } => n.hidden = false,
        }
    }

    /// Focus `node`, blurring the previously focused element
    pub(crate) fn focus(&mut self, node: usize) {
        if self.focused == Some(node) {
            return;
        }
        if let Some(previous) = self.focused {
            self.blur(previous);
        }
        self.focused = Some(node);
        let n = &mut self.nodes[node];
        n.caret = n.char_len();
        n.selection = None;
        self.fire(node, DomEvent::Focus);
    }

    /// Blur `node` if it has focus
    pub(crate) fn blur(&mut self, node: usize) {
        if self.focused == Some(node) {
            self.focused = None;
            self.fire(node, DomEvent::Blur);
        }
    }

    pub(crate) fn click(&mut self, node: usize, point: Point) {
        self.clicks.push(ClickRecord {
            element: node,
            point,
        });
        if self.nodes[node].is_focusable() && !self.nodes[node].disabled {
            self.focus(node);
        }
        self.fire(node, DomEvent::Click);
    }

    /// Empty the value of an editable element
    pub(crate) fn clear(&mut self, node: usize) {
        let n = &mut self.nodes[node];
        if n.value.is_some() {
            n.value = Some(String::new());
            n.caret = 0;
            n.selection = None;
        }
    }

    /// Enclosing form, the node itself included
    pub(crate) fn form_of(&self, node: usize) -> Option<usize> {
        std::iter::once(node)
            .chain(self.ancestors(node))
            .find(|&i| self.nodes[i].tag == "form")
    }

    /// Submit the enclosing form; `false` when there is none
    pub(crate) fn submit(&mut self, node: usize) -> bool {
        match self.form_of(node) {
            Some(form) => {
                self.fire(form, DomEvent::Submit);
                true
            }
            None => false,
        }
    }

    /// Apply one keystroke to an editable element
    pub(crate) fn press(&mut self, node: usize, input: KeyInput) {
        let editable = self.nodes[node].is_editable();
        match input {
            KeyInput::ModifierDown(_) | KeyInput::ModifierUp(_) => {}
            KeyInput::Char { ch, modifiers } => {
                if !editable || modifiers.is_shortcut() {
                    return;
                }
                let ch = if modifiers.shift {
                    ch.to_uppercase().next().unwrap_or(ch)
                } else {
                    ch
                };
                let n = &mut self.nodes[node];
                let (start, end) = n.selected_or(n.caret, n.caret);
                n.replace_range(start, end, ch.encode_utf8(&mut [0; 4]));
            }
            KeyInput::Key { key, .. } => {
                if key == SpecialKey::Enter {
                    if self.nodes[node].tag == "textarea" {
                        let n = &mut self.nodes[node];
                        let (start, end) = n.selected_or(n.caret, n.caret);
                        n.replace_range(start, end, "\n");
                    } else if editable {
                        self.submit(node);
                    }
                    return;
                }
                if editable {
                    edit_key(&mut self.nodes[node], key);
                }
            }
        }
    }

    /// Scroll containers, then the window, until `node` meets the viewport
    pub(crate) fn scroll_into_view(&mut self, node: usize) {
        let containers: Vec<usize> = self
            .ancestors(node)
            .filter(|&a| self.nodes[a].scroll_content.is_some())
            .collect();

        for container in containers {
            let view = self.layout_box(container);
            let target = self.layout_box(node);
            let Some(content) = self.nodes[container].scroll_content else {
                continue;
            };
            let offset = self.nodes[container].scroll_offset;
            let dx = overshoot(target.x, target.right(), view.x, view.right());
            let dy = overshoot(target.y, target.bottom(), view.y, view.bottom());
            let max_x = (content.width - view.width).max(0.0);
            let max_y = (content.height - view.height).max(0.0);
            self.nodes[container].scroll_offset = Point::new(
                (offset.x + dx).clamp(0.0, max_x),
                (offset.y + dy).clamp(0.0, max_y),
            );
        }

        let target = self.layout_box(node);
        if !target.intersects(&self.viewport_rect()) {
            let max_y = (self.size.height - self.viewport.height).max(0.0);
            let max_x = (self.size.width - self.viewport.width).max(0.0);
            self.window_scroll = Point::new(
                if target.x < self.window_scroll.x
                    || target.x >= self.window_scroll.x + self.viewport.width
                {
                    target.x.clamp(0.0, max_x)
                } else {
                    self.window_scroll.x
                },
                target.y.clamp(0.0, max_y),
            );
        }
    }

    /// Set `display: none` on `node`
    pub fn set_hidden(&mut self, node: usize, hidden: bool) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.hidden = hidden;
        }
    }

    /// Toggle the disabled flag on `node`
    pub fn set_disabled(&mut self, node: usize, disabled: bool) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.disabled = disabled;
        }
    }

    /// Detach `node` and its subtree
    pub fn detach(&mut self, node: usize) {
        if node >= self.nodes.len() {
            return;
        }
        let mut stack = vec![node];
        while let Some(i) = stack.pop() {
            self.nodes[i].connected = false;
            stack.extend(self.nodes[i].children.iter().copied());
        }
        if self.focused.is_some_and(|f| !self.nodes[f].connected) {
            self.focused = None;
        }
    }
}

/// How far a view must move so `[start, end)` fits in `[view_start, view_end)`
fn overshoot(start: f64, end: f64, view_start: f64, view_end: f64) -> f64 {
    if start < view_start {
        start - view_start
    } else if end > view_end {
        (end - view_end).min(start - view_start)
    } else {
        0.0
    }
}

fn edit_key(n: &mut Node, key: SpecialKey) {
    let len = n.char_len();
    match key {
        SpecialKey::ArrowLeft => {
            n.caret = match n.selection.take() {
                Some((start, _)) => start,
                None => n.caret.saturating_sub(1),
            };
        }
        SpecialKey::ArrowRight => {
            n.caret = match n.selection.take() {
                Some((_, end)) => end,
                None => (n.caret + 1).min(len),
            };
        }
        SpecialKey::ArrowUp | SpecialKey::Home | SpecialKey::PageUp => {
            n.selection = None;
            n.caret = 0;
        }
        SpecialKey::ArrowDown | SpecialKey::End | SpecialKey::PageDown => {
            n.selection = None;
            n.caret = len;
        }
        SpecialKey::Delete => {
            let (start, end) = n.selected_or(n.caret, (n.caret + 1).min(len));
            n.replace_range(start, end, "");
        }
        SpecialKey::Backspace => {
            let (start, end) = n.selected_or(n.caret.saturating_sub(1), n.caret);
            n.replace_range(start, end, "");
        }
        SpecialKey::SelectAll => {
            n.selection = Some((0, len));
            n.caret = len;
        }
        SpecialKey::Enter | SpecialKey::Escape | SpecialKey::Insert => {}
    }
}
