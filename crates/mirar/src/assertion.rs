//! Assertion engine.
//!
//! Expectations are checked against a fresh [`ElementState`] read at call
//! time. There is no retry: an expectation either holds now or the test body
//! stops with an `Assertion` error naming the selector, expected and actual
//! values.

use serde::{Deserialize, Serialize};

use crate::driver::{ElementHandle, ElementState, PageDriver};
use crate::result::{MirarError, MirarResult};

/// What an expectation tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    /// Form value equals
    Value(String),
    /// Class list contains
    Class(String),
    /// Attribute equals
    Attribute {
        /// Attribute name
        name: String,
        /// Expected value
        value: String,
    },
    /// Text content contains
    ContainsText(String),
    /// Rendered and not clipped away
    Visible,
}

/// A predicate, possibly negated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    /// Predicate to test
    pub predicate: Predicate,
    /// Expect the predicate not to hold
    #[serde(default)]
    pub negated: bool,
}

impl Expectation {
    const fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            negated: false,
        }
    }

    /// `have.value`
    #[must_use]
    pub fn have_value(value: impl Into<String>) -> Self {
        Self::new(Predicate::Value(value.into()))
    }

    /// `have.class`
    #[must_use]
    pub fn have_class(class: impl Into<String>) -> Self {
        Self::new(Predicate::Class(class.into()))
    }

    /// `have.attr`
    #[must_use]
    pub fn have_attr(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(Predicate::Attribute {
            name: name.into(),
            value: value.into(),
        })
    }

    /// `contain`
    #[must_use]
    pub fn contain(text: impl Into<String>) -> Self {
        Self::new(Predicate::ContainsText(text.into()))
    }

    /// `be.visible`
    #[must_use]
    pub const fn be_visible() -> Self {
        Self::new(Predicate::Visible)
    }

    /// Invert the expectation
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub const fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Human description, e.g. "not to have class"
    #[must_use]
    pub fn describe(&self) -> String {
        let base = match &self.predicate {
            Predicate::Value(_) => "to have value".to_string(),
            Predicate::Class(_) => "to have class".to_string(),
            Predicate::Attribute { name, .. } => format!("to have attribute `{name}`"),
            Predicate::ContainsText(_) => "to contain text".to_string(),
            Predicate::Visible => "to be visible".to_string(),
        };
        if self.negated {
            format!("not {base}")
        } else {
            base
        }
    }

    fn expected(&self) -> String {
        match &self.predicate {
            Predicate::Value(v) | Predicate::Class(v) | Predicate::ContainsText(v) => v.clone(),
            Predicate::Attribute { value, .. } => value.clone(),
            Predicate::Visible => (if self.negated { "hidden" } else { "visible" }).to_string(),
        }
    }

    /// Whether the predicate holds, and what was observed
    fn observe(&self, state: &ElementState) -> (bool, String) {
        match &self.predicate {
            Predicate::Value(expected) => {
                let actual = state.value.clone().unwrap_or_default();
                (actual == *expected, actual)
            }
            Predicate::Class(class) => (state.has_class(class), state.classes.join(" ")),
            Predicate::Attribute { name, value } => match state.attribute(name) {
                Some(actual) => (actual == value, actual.to_string()),
                None => (false, format!("no `{name}` attribute")),
            },
            Predicate::ContainsText(text) => {
                (state.text.contains(text.as_str()), state.text.clone())
            }
            Predicate::Visible => (
                state.visible,
                (if state.visible { "visible" } else { "hidden" }).to_string(),
            ),
        }
    }

    /// Check one element snapshot
    pub fn check(&self, selector: &str, state: &ElementState) -> MirarResult<()> {
        let (holds, actual) = self.observe(state);
        if holds != self.negated {
            Ok(())
        } else {
            Err(self.failure(selector, actual))
        }
    }

    fn failure(&self, selector: &str, actual: String) -> MirarError {
        MirarError::Assertion {
            predicate: self.describe(),
            selector: selector.to_string(),
            expected: self.expected(),
            actual,
        }
    }

    /// Check every element of a subject; an empty subject fails
    pub async fn verify(
        &self,
        driver: &dyn PageDriver,
        handles: &[ElementHandle],
    ) -> MirarResult<()> {
        if handles.is_empty() {
            return Err(self.failure("<empty subject>", "no elements".to_string()));
        }
        for handle in handles {
            let state = driver.state(handle).await?;
            self.check(handle.selector(), &state)?;
            tracing::debug!(
                selector = handle.selector(),
                expectation = %self.describe(),
                "assertion passed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::driver::Size;
    use crate::locator::BoundingBox;
    use std::collections::BTreeMap;

    fn state() -> ElementState {
        ElementState {
            tag: "input".to_string(),
            value: Some("fake@email.com".to_string()),
            classes: vec!["form-control".to_string(), "focus".to_string()],
            attributes: BTreeMap::from([("style".to_string(), "color: orange;".to_string())]),
            visible: true,
            text: "Your form has been submitted!".to_string(),
            disabled: false,
            connected: true,
            obscured: false,
            editable: true,
            focusable: true,
            focused: true,
            bounds: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            content_size: Size::new(10.0, 10.0),
        }
    }

    mod predicate_tests {
        use super::*;

        #[test]
        fn test_passing_predicates() {
            let s = state();
            for e in [
                Expectation::have_value("fake@email.com"),
                Expectation::have_class("focus"),
                Expectation::have_attr("style", "color: orange;"),
                Expectation::contain("submitted"),
                Expectation::be_visible(),
            ] {
                e.check(".x", &s).unwrap();
            }
        }

        #[test]
        fn test_value_mismatch_reports_both_sides() {
            let err = Expectation::have_value("fake@email.com")
                .check(".action-email", &ElementState {
                    value: Some("fake@email.co".to_string()),
                    ..state()
                })
                .unwrap_err();
            match err {
                MirarError::Assertion {
                    predicate,
                    selector,
                    expected,
                    actual,
                } => {
                    assert_eq!(predicate, "to have value");
                    assert_eq!(selector, ".action-email");
                    assert_eq!(expected, "fake@email.com");
                    assert_eq!(actual, "fake@email.co");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_missing_attribute() {
            let err = Expectation::have_attr("title", "x")
                .check(".x", &state())
                .unwrap_err();
            assert!(err.to_string().contains("no `title` attribute"));
        }

        #[test]
        fn test_class_is_exact_token() {
            assert!(Expectation::have_class("foc").check(".x", &state()).is_err());
        }
    }

    mod negation_tests {
        use super::*;

        #[test]
        fn test_not_visible() {
            let hidden = ElementState {
                visible: false,
                ..state()
            };
            Expectation::be_visible().not().check(".x", &hidden).unwrap();
            let err = Expectation::be_visible().not().check(".x", &state()).unwrap_err();
            assert!(err.to_string().contains("not to be visible"));
        }

        #[test]
        fn test_double_negation() {
            let e = Expectation::have_class("focus").not().not();
            assert!(!e.negated);
            e.check(".x", &state()).unwrap();
        }

        #[test]
        fn test_serde_shape() {
            let e: Expectation =
                serde_json::from_str(r#"{"predicate":{"class":"error"},"negated":true}"#).unwrap();
            assert_eq!(e, Expectation::have_class("error").not());
            let v: Expectation = serde_json::from_str(r#"{"predicate":"visible"}"#).unwrap();
            assert_eq!(v, Expectation::be_visible());
        }
    }

    mod subject_tests {
        use super::*;
        use crate::demo::{actions_page, ACTIONS_URL};
        use crate::sim::SimulatedPage;

        #[tokio::test]
        async fn test_every_handle_must_pass() {
            let page = SimulatedPage::default().with_route(ACTIONS_URL, actions_page());
            page.navigate(ACTIONS_URL).await.unwrap();
            let labels = page.query_all(".action-labels>.label", None).await.unwrap();
            Expectation::have_class("label")
                .verify(&page, &labels)
                .await
                .unwrap();
            let mixed = page.query_all(".label, .action-btn", None).await.unwrap();
            assert!(Expectation::have_class("label")
                .verify(&page, &mixed)
                .await
                .is_err());
        }

        #[tokio::test]
        async fn test_empty_subject_fails() {
            let page = SimulatedPage::default().with_route(ACTIONS_URL, actions_page());
            page.navigate(ACTIONS_URL).await.unwrap();
            let err = Expectation::be_visible().not().verify(&page, &[]).await.unwrap_err();
            assert_eq!(err.kind(), "AssertionError");
        }

        #[tokio::test]
        async fn test_clipped_button_not_visible() {
            let page = SimulatedPage::default().with_route(ACTIONS_URL, actions_page());
            page.navigate(ACTIONS_URL).await.unwrap();
            let button = page.query_all("#scroll-vertical button", None).await.unwrap();
            Expectation::be_visible()
                .not()
                .verify(&page, &button)
                .await
                .unwrap();
        }
    }
}
