//! CSS selector subset for the simulated DOM.
//!
//! Supported: selector lists (`a, b`), descendant and child combinators,
//! `*`, tag names, `#id`, `.class`, `[attr]` and `[attr=value]` with optional
//! quotes. Pseudo-classes and sibling combinators are rejected.

use crate::result::{MirarError, MirarResult};

/// Element facts a compound selector can test
pub(crate) trait ElementLike {
    fn tag(&self) -> &str;
    fn element_id(&self) -> Option<&str>;
    fn has_class(&self, class: &str) -> bool;
    fn attribute(&self, name: &str) -> Option<String>;
}

/// Tree walk needed by combinators
pub(crate) trait Tree {
    type Element: ElementLike;

    fn element(&self, index: usize) -> &Self::Element;
    fn parent(&self, index: usize) -> Option<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Compound {
    fn matches(&self, el: &impl ElementLike) -> bool {
        if let Some(tag) = &self.tag {
            if !el.tag().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.element_id() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| el.has_class(c)) {
            return false;
        }
        self.attributes
            .iter()
            .all(|(name, expected)| match (el.attribute(name), expected) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == *expected,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    // How this step relates to the previous one; ignored for the first step
    combinator: Combinator,
    compound: Compound,
}

/// Parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorList {
    chains: Vec<Vec<Step>>,
}

impl SelectorList {
    /// Parse a selector list
    pub(crate) fn parse(selector: &str) -> MirarResult<Self> {
        let chains = split_top_level(selector, ',')
            .into_iter()
            .map(|group| parse_chain(selector, group))
            .collect::<MirarResult<Vec<_>>>()?;
        Ok(Self { chains })
    }

    /// Whether element `index` of `tree` matches any chain
    pub(crate) fn matches<T: Tree>(&self, tree: &T, index: usize) -> bool {
        self.chains
            .iter()
            .any(|steps| matches_step(tree, steps, steps.len() - 1, index))
    }
}

fn matches_step<T: Tree>(tree: &T, steps: &[Step], at: usize, index: usize) -> bool {
    if !steps[at].compound.matches(tree.element(index)) {
        return false;
    }
    if at == 0 {
        return true;
    }
    match steps[at].combinator {
        Combinator::Child => tree
            .parent(index)
            .is_some_and(|parent| matches_step(tree, steps, at - 1, parent)),
        Combinator::Descendant => {
            let mut ancestor = tree.parent(index);
            while let Some(a) = ancestor {
                if matches_step(tree, steps, at - 1, a) {
                    return true;
                }
                ancestor = tree.parent(a);
            }
            false
        }
    }
}

fn unsupported(selector: &str, why: &str) -> MirarError {
    MirarError::InvalidLocator {
        locator: selector.to_string(),
        message: why.to_string(),
    }
}

/// Split on `sep` outside brackets and quotes
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn parse_chain(full: &str, group: &str) -> MirarResult<Vec<Step>> {
    let group = group.trim();
    if group.is_empty() {
        return Err(unsupported(full, "empty selector"));
    }

    let mut steps = Vec::new();
    let mut pending = Combinator::Descendant;
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    let mut flush = |current: &mut String, pending: &mut Combinator| -> MirarResult<()> {
        if current.is_empty() {
            return Ok(());
        }
        steps.push(Step {
            combinator: *pending,
            compound: parse_compound(full, current)?,
        });
        current.clear();
        *pending = Combinator::Descendant;
        Ok(())
    };

    for ch in group.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') if depth > 0 => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '[') => {
                depth += 1;
                current.push(ch);
            }
            (None, ']') => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            (None, c) if depth == 0 && c.is_whitespace() => flush(&mut current, &mut pending)?,
            (None, '>') if depth == 0 => {
                flush(&mut current, &mut pending)?;
                pending = Combinator::Child;
            }
            (None, '+' | '~' | ':') if depth == 0 => {
                return Err(unsupported(
                    full,
                    "sibling combinators and pseudo-classes are not supported",
                ));
            }
            (None, c) => current.push(c),
        }
    }
    flush(&mut current, &mut pending)?;

    if steps.is_empty() || pending == Combinator::Child {
        return Err(unsupported(full, "dangling combinator"));
    }
    Ok(steps)
}

fn parse_compound(full: &str, text: &str) -> MirarResult<Compound> {
    let mut compound = Compound::default();
    let bytes: Vec<char> = text.chars().collect();
    let mut i = 0;

    let read_name = |i: &mut usize| -> String {
        let start = *i;
        while *i < bytes.len() && (bytes[*i].is_alphanumeric() || matches!(bytes[*i], '-' | '_')) {
            *i += 1;
        }
        bytes[start..*i].iter().collect()
    };

    if bytes.first() == Some(&'*') {
        i = 1;
    } else if bytes.first().is_some_and(|c| c.is_alphabetic()) {
        compound.tag = Some(read_name(&mut i).to_ascii_lowercase());
    }

    while i < bytes.len() {
        match bytes[i] {
            '#' => {
                i += 1;
                let name = read_name(&mut i);
                if name.is_empty() {
                    return Err(unsupported(full, "empty id"));
                }
                compound.id = Some(name);
            }
            '.' => {
                i += 1;
                let name = read_name(&mut i);
                if name.is_empty() {
                    return Err(unsupported(full, "empty class"));
                }
                compound.classes.push(name);
            }
            '[' => {
                let close = bytes[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| unsupported(full, "unterminated attribute selector"))?;
                let inner: String = bytes[i + 1..close].iter().collect();
                compound.attributes.push(parse_attribute(full, &inner)?);
                i = close + 1;
            }
            _ => return Err(unsupported(full, "unexpected character")),
        }
    }
    Ok(compound)
}

fn parse_attribute(full: &str, inner: &str) -> MirarResult<(String, Option<String>)> {
    let Some((name, value)) = inner.split_once('=') else {
        let name = inner.trim();
        if name.is_empty() {
            return Err(unsupported(full, "empty attribute name"));
        }
        return Ok((name.to_string(), None));
    };
    let name = name.trim();
    if name.is_empty() || name.ends_with(['~', '|', '^', '$', '*']) {
        return Err(unsupported(full, "only [attr] and [attr=value] are supported"));
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    Ok((name.to_string(), Some(value.to_string())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct El {
        tag: &'static str,
        id: Option<&'static str>,
        classes: Vec<&'static str>,
        attrs: HashMap<&'static str, &'static str>,
    }

    impl ElementLike for El {
        fn tag(&self) -> &str {
            self.tag
        }
        fn element_id(&self) -> Option<&str> {
            self.id
        }
        fn has_class(&self, class: &str) -> bool {
            self.classes.contains(&class)
        }
        fn attribute(&self, name: &str) -> Option<String> {
            self.attrs.get(name).map(|v| (*v).to_string())
        }
    }

    struct Nodes(Vec<(El, Option<usize>)>);

    impl Tree for Nodes {
        type Element = El;
        fn element(&self, index: usize) -> &El {
            &self.0[index].0
        }
        fn parent(&self, index: usize) -> Option<usize> {
            self.0[index].1
        }
    }

    fn el(tag: &'static str, classes: &[&'static str]) -> El {
        El {
            tag,
            id: None,
            classes: classes.to_vec(),
            attrs: HashMap::new(),
        }
    }

    // body > div.banner > div, plus div#scroll-vertical > div > button
    fn tree() -> Nodes {
        let mut scroll = el("div", &[]);
        scroll.id = Some("scroll-vertical");
        let mut input = el("input", &["form-control"]);
        input.attrs.insert("type", "text");
        Nodes(vec![
            (el("body", &[]), None),
            (el("div", &["banner"]), Some(0)),
            (el("div", &["container"]), Some(1)),
            (scroll, Some(0)),
            (el("div", &[]), Some(3)),
            (el("button", &["btn"]), Some(4)),
            (input, Some(0)),
        ])
    }

    fn matching(selector: &str) -> Vec<usize> {
        let list = SelectorList::parse(selector).unwrap();
        let t = tree();
        (0..t.0.len()).filter(|i| list.matches(&t, *i)).collect()
    }

    #[test]
    fn test_child_chain() {
        assert_eq!(matching("body > div.banner > div"), vec![2]);
        assert_eq!(matching("body>div.banner>div"), vec![2]);
    }

    #[test]
    fn test_descendant() {
        assert_eq!(matching("#scroll-vertical button"), vec![5]);
        assert!(matching("#scroll-vertical > button").is_empty());
    }

    #[test]
    fn test_attribute_forms() {
        assert_eq!(matching(r#"[type="text"]"#), vec![6]);
        assert_eq!(matching("[type='text']"), vec![6]);
        assert_eq!(matching("input[type=text]"), vec![6]);
        assert_eq!(matching("[type]"), vec![6]);
        assert!(matching("[type=email]").is_empty());
    }

    #[test]
    fn test_lists_and_universal() {
        assert_eq!(matching(".btn, .banner"), vec![1, 5]);
        assert_eq!(matching("*").len(), 7);
        assert_eq!(matching("BUTTON.btn"), vec![5]);
    }

    #[test]
    fn test_rejects_unsupported() {
        assert!(SelectorList::parse("a:hover").is_err());
        assert!(SelectorList::parse("a + b").is_err());
        assert!(SelectorList::parse("a >").is_err());
        assert!(SelectorList::parse("").is_err());
        assert!(SelectorList::parse("[type~=x]").is_err());
        assert!(SelectorList::parse("div,").is_err());
    }
}
