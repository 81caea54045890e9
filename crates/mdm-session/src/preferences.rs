//! User, session, language and layout choices.
//!
//! Each of session, language and layout resolves in three layers:
//!
//! ```text
//!   selected (caller's explicit choice)
//!     └─ saved (read back from the user's settings by the worker)
//!          └─ system default (configuration / environment probe)
//! ```
//!
//! Changing the user clears every saved value, since they belong to the
//! previous user.

use crate::PREVIOUS;

#[derive(Debug, Clone, Default)]
pub(crate) struct Layered {
    selected: Option<String>,
    saved: Option<String>,
}

impl Layered {
    /// Applies a selector value; [`PREVIOUS`] clears the choice.
    fn select(&mut self, value: &str) {
        self.selected = (value != PREVIOUS).then(|| value.to_string());
    }

    fn default_or<'a>(&'a self, system: &'a str) -> &'a str {
        self.saved.as_deref().unwrap_or(system)
    }

    fn effective_or<'a>(&'a self, system: &'a str) -> &'a str {
        self.selected.as_deref().unwrap_or(self.default_or(system))
    }
}

/// The preference state of one conversation.
#[derive(Debug, Clone)]
pub(crate) struct Preferences {
    user: Option<String>,
    session: Layered,
    language: Layered,
    layout: Layered,
    system_language: String,
    system_layout: String,
}

impl Preferences {
    pub fn new(system_language: impl Into<String>, system_layout: impl Into<String>) -> Self {
        Self {
            user: None,
            session: Layered::default(),
            language: Layered::default(),
            layout: Layered::default(),
            system_language: system_language.into(),
            system_layout: system_layout.into(),
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Switches user and forgets the previous user's saved values.
    pub fn select_user(&mut self, user: Option<String>) {
        self.user = user.filter(|u| !u.is_empty() && u != PREVIOUS);
        self.session.saved = None;
        self.language.saved = None;
        self.layout.saved = None;
    }

    pub fn select_session(&mut self, value: &str) {
        self.session.select(value);
    }

    pub fn select_language(&mut self, value: &str) {
        self.language.select(value);
    }

    pub fn select_layout(&mut self, value: &str) {
        self.layout.select(value);
    }

    pub fn set_saved_session(&mut self, name: &str) {
        self.session.saved = Some(name.to_string());
    }

    pub fn set_saved_language(&mut self, name: &str) {
        self.language.saved = Some(name.to_string());
    }

    pub fn set_saved_layout(&mut self, name: &str) {
        self.layout.saved = Some(name.to_string());
    }

    /// Default session: the saved one, else `fallback`, which the caller
    /// resolves from the session catalog.
    pub fn default_session<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.session.default_or(fallback)
    }

    pub fn session<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.session.effective_or(fallback)
    }

    pub fn default_language(&self) -> &str {
        self.language.default_or(&self.system_language)
    }

    pub fn language(&self) -> &str {
        self.language.effective_or(&self.system_language)
    }

    pub fn default_layout(&self) -> &str {
        self.layout.default_or(&self.system_layout)
    }

    pub fn layout(&self) -> &str {
        self.layout.effective_or(&self.system_layout)
    }

    /// Drops every choice; system defaults are kept.
    pub fn clear(&mut self) {
        self.user = None;
        self.session = Layered::default();
        self.language = Layered::default();
        self.layout = Layered::default();
    }
}
