//! Keyboard input: `{token}` parsing and the keystroke plan sent to drivers.
//!
//! Typed text may embed special keys between braces (`{backspace}`,
//! `{selectall}`, `{ctrl}`...). Tokens are matched case-insensitively against a
//! fixed alias table; synonyms map to one logical key.
//!
//! Modifier tokens are *held*: once pressed they apply to every following
//! keystroke of the same `type` call and are released when the call ends.
//! Pressing an already-held modifier again (`{alt}{option}`) does nothing.

use serde::{Deserialize, Serialize};

use crate::result::{MirarError, MirarResult};

/// Non-printable keys understood by `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialKey {
    /// Move caret left
    ArrowLeft,
    /// Move caret right
    ArrowRight,
    /// Move caret to start (single-line inputs)
    ArrowUp,
    /// Move caret to end (single-line inputs)
    ArrowDown,
    /// Delete the character after the caret
    Delete,
    /// Delete the character before the caret
    Backspace,
    /// Select the whole value
    SelectAll,
    /// Enter / Return
    Enter,
    /// Escape
    Escape,
    /// Caret to start of line
    Home,
    /// Caret to end of line
    End,
    /// Page up
    PageUp,
    /// Page down
    PageDown,
    /// Insert
    Insert,
}

impl SpecialKey {
    /// DOM `KeyboardEvent.key` value
    #[must_use]
    pub const fn dom_key(&self) -> &'static str {
        match self {
            Self::ArrowLeft => "ArrowLeft",
            Self::ArrowRight => "ArrowRight",
            Self::ArrowUp => "ArrowUp",
            Self::ArrowDown => "ArrowDown",
            Self::Delete => "Delete",
            Self::Backspace => "Backspace",
            // No DOM key exists; drivers emulate it
            Self::SelectAll => "SelectAll",
            Self::Enter => "Enter",
            Self::Escape => "Escape",
            Self::Home => "Home",
            Self::End => "End",
            Self::PageUp => "PageUp",
            Self::PageDown => "PageDown",
            Self::Insert => "Insert",
        }
    }
}

/// Modifier keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modifier {
    /// Alt / Option
    Alt,
    /// Control
    Control,
    /// Meta / Command
    Meta,
    /// Shift
    Shift,
}

impl Modifier {
    /// DOM `KeyboardEvent.key` value
    #[must_use]
    pub const fn dom_key(&self) -> &'static str {
        match self {
            Self::Alt => "Alt",
            Self::Control => "Control",
            Self::Meta => "Meta",
            Self::Shift => "Shift",
        }
    }
}

/// Set of held modifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    /// Alt held
    pub alt: bool,
    /// Control held
    pub control: bool,
    /// Meta held
    pub meta: bool,
    /// Shift held
    pub shift: bool,
}

impl Modifiers {
    /// No modifiers
    pub const NONE: Self = Self {
        alt: false,
        control: false,
        meta: false,
        shift: false,
    };

    /// Whether `modifier` is held
    #[must_use]
    pub const fn contains(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Alt => self.alt,
            Modifier::Control => self.control,
            Modifier::Meta => self.meta,
            Modifier::Shift => self.shift,
        }
    }

    /// Copy with `modifier` held
    #[must_use]
    pub const fn with(mut self, modifier: Modifier) -> Self {
        match modifier {
            Modifier::Alt => self.alt = true,
            Modifier::Control => self.control = true,
            Modifier::Meta => self.meta = true,
            Modifier::Shift => self.shift = true,
        }
        self
    }

    /// Alt, Control or Meta held: printable keys become shortcuts and insert nothing
    #[must_use]
    pub const fn is_shortcut(&self) -> bool {
        self.alt || self.control || self.meta
    }
}

/// One parsed element of typed text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyToken {
    /// Printable character
    Char(char),
    /// Special key
    Key(SpecialKey),
    /// Modifier press
    Modifier(Modifier),
}

/// One keystroke sent to a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyInput {
    /// Printable character with the modifiers held at the time
    Char {
        /// Character
        ch: char,
        /// Held modifiers
        modifiers: Modifiers,
    },
    /// Special key with the modifiers held at the time
    Key {
        /// Key
        key: SpecialKey,
        /// Held modifiers
        modifiers: Modifiers,
    },
    /// Modifier pressed and held
    ModifierDown(Modifier),
    /// Modifier released
    ModifierUp(Modifier),
}

impl KeyInput {
    /// Releases are bookkeeping, not keystrokes, and are never delayed
    #[must_use]
    pub const fn is_keystroke(&self) -> bool {
        !matches!(self, Self::ModifierUp(_))
    }
}

const ALIASES: &[(&str, KeyToken)] = &[
    ("leftarrow", KeyToken::Key(SpecialKey::ArrowLeft)),
    ("rightarrow", KeyToken::Key(SpecialKey::ArrowRight)),
    ("uparrow", KeyToken::Key(SpecialKey::ArrowUp)),
    ("downarrow", KeyToken::Key(SpecialKey::ArrowDown)),
    ("del", KeyToken::Key(SpecialKey::Delete)),
    ("backspace", KeyToken::Key(SpecialKey::Backspace)),
    ("selectall", KeyToken::Key(SpecialKey::SelectAll)),
    ("enter", KeyToken::Key(SpecialKey::Enter)),
    ("esc", KeyToken::Key(SpecialKey::Escape)),
    ("home", KeyToken::Key(SpecialKey::Home)),
    ("end", KeyToken::Key(SpecialKey::End)),
    ("pageup", KeyToken::Key(SpecialKey::PageUp)),
    ("pagedown", KeyToken::Key(SpecialKey::PageDown)),
    ("insert", KeyToken::Key(SpecialKey::Insert)),
    ("{", KeyToken::Char('{')),
    ("alt", KeyToken::Modifier(Modifier::Alt)),
    ("option", KeyToken::Modifier(Modifier::Alt)),
    ("ctrl", KeyToken::Modifier(Modifier::Control)),
    ("control", KeyToken::Modifier(Modifier::Control)),
    ("meta", KeyToken::Modifier(Modifier::Meta)),
    ("command", KeyToken::Modifier(Modifier::Meta)),
    ("cmd", KeyToken::Modifier(Modifier::Meta)),
    ("shift", KeyToken::Modifier(Modifier::Shift)),
];

fn lookup(name: &str) -> Option<KeyToken> {
    let name = name.to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, token)| *token)
}

/// Split typed text into characters, special keys and modifiers.
///
/// The whole text is validated before anything is typed: an unknown or
/// unterminated `{token}` fails with `UnknownKey`.
pub fn parse_keys(text: &str) -> MirarResult<Vec<KeyToken>> {
    let mut tokens = Vec::with_capacity(text.len());
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        if ch != '{' {
            tokens.push(KeyToken::Char(ch));
            rest = &rest[ch.len_utf8()..];
            continue;
        }

        // `{{}` closes at the first `}` after the opening brace
        let Some(close) = rest[1..].find('}').map(|i| i + 1) else {
            return Err(MirarError::UnknownKey {
                token: rest.to_string(),
            });
        };
        let name = &rest[1..close];
        let token = lookup(name).ok_or_else(|| MirarError::UnknownKey {
            token: rest[..=close].to_string(),
        })?;
        tokens.push(token);
        rest = &rest[close + 1..];
    }

    Ok(tokens)
}

/// Turn parsed tokens into driver keystrokes, holding modifiers until the end.
#[must_use]
pub fn keystrokes(tokens: &[KeyToken]) -> Vec<KeyInput> {
    let mut held = Modifiers::NONE;
    let mut order = Vec::new();
    let mut inputs = Vec::with_capacity(tokens.len());

    for token in tokens {
        match *token {
            KeyToken::Char(ch) => inputs.push(KeyInput::Char {
                ch,
                modifiers: held,
            }),
            KeyToken::Key(key) => inputs.push(KeyInput::Key {
                key,
                modifiers: held,
            }),
            KeyToken::Modifier(modifier) => {
                if !held.contains(modifier) {
                    held = held.with(modifier);
                    order.push(modifier);
                    inputs.push(KeyInput::ModifierDown(modifier));
                }
            }
        }
    }

    inputs.extend(order.into_iter().rev().map(KeyInput::ModifierUp));
    inputs
}
