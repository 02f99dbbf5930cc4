//! Demo fixture: the "commands/actions" kitchen-sink page.
//!
//! A static layout of the controls the actions suite exercises, with the
//! page scripts (focus/blur styling, form submission message) modelled as
//! [`Reaction`]s. Served by [`actions_site`] at the configured base URL.

use crate::config::HarnessConfig;
use crate::driver::Size;
use crate::sim::{Document, DomEvent, ElementSpec, Reaction, Relative, SimulatedPage};

/// URL the page is served at by default
pub const ACTIONS_URL: &str = "http://localhost:8080/commands/actions";

/// Full document size
pub const PAGE_SIZE: Size = Size::new(1000.0, 1600.0);

/// Text revealed next to `.action-form` once it is submitted
pub const SUBMITTED_MESSAGE: &str = "Your form has been submitted!";

fn label(text: &str, y: f64) -> ElementSpec {
    ElementSpec::new("label").text(text).at(20.0, y, 300.0, 20.0)
}

fn text_input(class: &str, y: f64) -> ElementSpec {
    ElementSpec::new("input")
        .class(class)
        .attr("type", "text")
        .at(20.0, y, 300.0, 30.0)
}

fn banner() -> ElementSpec {
    ElementSpec::new("div")
        .class("banner")
        .at(0.0, 0.0, 1000.0, 60.0)
        .child(
            ElementSpec::new("div")
                .class("container")
                .text("Actions")
                .at(20.0, 10.0, 960.0, 40.0),
        )
}

fn inputs() -> Vec<ElementSpec> {
    vec![
        label("Email address", 80.0),
        ElementSpec::new("input")
            .id("email1")
            .class("form-control action-email")
            .attr("type", "email")
            .attr("placeholder", "Email")
            .at(20.0, 100.0, 300.0, 30.0),
        label("Disabled Textarea", 140.0),
        ElementSpec::new("textarea")
            .class("form-control action-disabled")
            .attr("placeholder", "Disabled Textarea")
            .disabled()
            .at(20.0, 160.0, 300.0, 60.0),
        label("Password", 230.0),
        text_input("form-control action-focus", 250.0)
            .attr("type", "password")
            .on(DomEvent::Focus, Reaction::add_class(Relative::This, "focus"))
            .on(
                DomEvent::Focus,
                Reaction::set_attribute(Relative::Previous, "style", "color: orange;"),
            ),
        label("Full Name", 290.0),
        text_input("form-control action-blur", 310.0)
            .on(DomEvent::Blur, Reaction::add_class(Relative::This, "error"))
            .on(
                DomEvent::Blur,
                Reaction::set_attribute(Relative::Previous, "style", "color: red;"),
            ),
        label("Describe:", 350.0),
        text_input("form-control action-clear", 370.0)
            .attr("placeholder", "Clear this text"),
    ]
}

fn coupon_form() -> Vec<ElementSpec> {
    vec![
        ElementSpec::new("form")
            .class("action-form")
            .at(20.0, 420.0, 400.0, 80.0)
            .on(
                DomEvent::Submit,
                Reaction::set_text(Relative::Next, SUBMITTED_MESSAGE),
            )
            .child(label("Coupon Code", 420.0))
            .child(
                ElementSpec::new("input")
                    .id("couponCode1")
                    .class("form-control")
                    .attr("type", "text")
                    .at(20.0, 445.0, 200.0, 30.0),
            )
            .child(
                ElementSpec::new("button")
                    .class("btn")
                    .attr("type", "submit")
                    .text("Submit")
                    .at(230.0, 445.0, 80.0, 30.0),
            ),
        ElementSpec::new("p").at(20.0, 505.0, 400.0, 20.0),
    ]
}

fn click_targets() -> Vec<ElementSpec> {
    vec![
        ElementSpec::new("button")
            .class("btn btn-lg btn-danger action-btn")
            .attr("type", "button")
            .text("Click to toggle popover")
            .at(20.0, 540.0, 220.0, 40.0)
            .on(
                DomEvent::Click,
                Reaction::set_attribute(Relative::This, "aria-describedby", "popover"),
            ),
        ElementSpec::new("canvas")
            .id("action-canvas")
            .attr("width", "250")
            .attr("height", "250")
            .at(20.0, 600.0, 250.0, 250.0),
        ElementSpec::new("div")
            .class("action-labels")
            .at(20.0, 870.0, 600.0, 40.0)
            .children([20.0, 130.0, 240.0].map(|x| {
                ElementSpec::new("span")
                    .class("label label-primary")
                    .text("click me")
                    .at(x, 875.0, 100.0, 30.0)
                    .on(DomEvent::Click, Reaction::add_class(Relative::This, "clicked"))
            })),
        ElementSpec::new("div")
            .class("action-opacity")
            .at(20.0, 930.0, 300.0, 40.0)
            .child(
                ElementSpec::new("button")
                    .class("btn btn-lg btn-primary")
                    .text("I'm being covered")
                    .transparent()
                    .at(20.0, 930.0, 300.0, 40.0),
            ),
    ]
}

fn scroll_container() -> ElementSpec {
    ElementSpec::new("div")
        .id("scroll-vertical")
        .at(20.0, 1000.0, 300.0, 200.0)
        .scrollable(300.0, 600.0)
        .child(
            ElementSpec::new("div")
                .at(20.0, 1000.0, 300.0, 600.0)
                .child(
                    ElementSpec::new("button")
                        .class("btn btn-danger")
                        .text("I'm Here")
                        .at(120.0, 1500.0, 100.0, 40.0),
                ),
        )
}

/// The actions page document
#[must_use]
pub fn actions_page() -> Document {
    let body = ElementSpec::new("body")
        .at(0.0, 0.0, PAGE_SIZE.width, PAGE_SIZE.height)
        .child(banner())
        .children(inputs())
        .children(coupon_form())
        .children(click_targets())
        .child(scroll_container());
    Document::new(body, PAGE_SIZE)
}

/// A simulated browser serving [`actions_page`] at `config.base_url`
#[must_use]
pub fn actions_site(config: &HarnessConfig) -> SimulatedPage {
    SimulatedPage::new(Size::new(
        f64::from(config.viewport_width),
        f64::from(config.viewport_height),
    ))
    .with_route(config.base_url.clone(), actions_page())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::driver::PageDriver;

    async fn site() -> SimulatedPage {
        let page = actions_site(&HarnessConfig::default());
        page.navigate(ACTIONS_URL).await.unwrap();
        page
    }

    #[tokio::test]
    async fn test_every_suite_selector_matches() {
        let page = site().await;
        for (selector, count) in [
            (".action-email", 1),
            (".action-disabled", 1),
            (".action-focus", 1),
            (".action-blur", 1),
            (".action-clear", 1),
            (".action-form", 1),
            (".action-btn", 1),
            ("#action-canvas", 1),
            (".action-labels>.label", 3),
            (".action-opacity>.btn", 1),
            ("#scroll-vertical button", 1),
            ("body > div.banner > div", 1),
        ] {
            let found = page.query_all(selector, None).await.unwrap();
            assert_eq!(found.len(), count, "{selector}");
        }
    }

    #[tokio::test]
    async fn test_initial_states() {
        let page = site().await;
        let get = |s: &'static str| {
            let page = &page;
            async move {
                let h = page.query_all(s, None).await.unwrap().remove(0);
                page.state(&h).await.unwrap()
            }
        };
        assert_eq!(get(".action-disabled").await.actionability_issue(), Some("disabled"));
        assert_eq!(get(".action-opacity>.btn").await.actionability_issue(), Some("not visible"));
        assert!(!get("#scroll-vertical button").await.visible);
        assert!(get(".action-email").await.editable);
        assert_eq!(get(".action-email").await.actionability_issue(), None);
        assert_eq!(get("#action-canvas").await.bounds.width, 250.0);
    }

    #[test]
    fn test_fits_in_document() {
        let doc = actions_page();
        assert_eq!(doc.size(), PAGE_SIZE);
        assert!(!doc.is_empty());
    }
}
