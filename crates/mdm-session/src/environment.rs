//! The environment handed to the session program.

use crate::SessionError;

/// Ordered key/value pairs; setting an existing key overwrites it in place.
///
/// The table is frozen when the program is started and thawed again only
/// if the start fails.
#[derive(Debug, Clone, Default)]
pub(crate) struct Environment {
    vars: Vec<(String, String)>,
    frozen: bool,
}

impl Environment {
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        if self.frozen {
            return Err(SessionError::EnvironmentFrozen);
        }
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.vars.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn clear(&mut self) {
        self.vars.clear();
        self.frozen = false;
    }
}
