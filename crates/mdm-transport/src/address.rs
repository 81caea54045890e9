//! Endpoint addresses for private per-session channels.
//!
//! Every session gets its own endpoint, named with a random 8-letter
//! token so another local process cannot guess it:
//!
//! ```text
//! unix:abstract=/tmp/mdm-session-QwErTyUi    (Linux abstract namespace)
//! unix:path=/run/mdm/mdm-session-QwErTyUi    (filesystem socket)
//! ```
//!
//! The string form is what gets handed to the worker process through its
//! environment, so `Display` and `FromStr` must agree exactly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand::Rng;

use crate::TransportError;

/// Prefix shared by every generated endpoint name.
pub const ADDRESS_PREFIX: &str = "mdm-session-";

/// Number of random letters appended to [`ADDRESS_PREFIX`].
const TOKEN_LEN: usize = 8;

/// A local endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A name in the Linux abstract socket namespace. No file is created.
    Abstract(String),

    /// A socket file on the filesystem.
    Path(PathBuf),
}

impl Address {
    /// Generates a fresh, unguessable address.
    ///
    /// With `dir = None` the address lives in the abstract namespace under
    /// `/tmp`; otherwise a socket file inside `dir` is used.
    pub fn generate(dir: Option<&Path>) -> Self {
        let name = format!("{ADDRESS_PREFIX}{}", random_token());
        match dir {
            Some(dir) => Self::Path(dir.join(name)),
            None => Self::Abstract(format!("/tmp/{name}")),
        }
    }

    /// Returns `true` for abstract-namespace addresses.
    pub fn is_abstract(&self) -> bool {
        matches!(self, Self::Abstract(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract(name) => write!(f, "unix:abstract={name}"),
            Self::Path(path) => write!(f, "unix:path={}", path.display()),
        }
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("unix:abstract=") {
            if name.is_empty() {
                return Err(TransportError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Abstract(name.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix:path=") {
            if path.is_empty() {
                return Err(TransportError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Path(PathBuf::from(path)));
        }
        Err(TransportError::InvalidAddress(s.to_string()))
    }
}

/// Eight letters, each independently lower- or upper-case.
fn random_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| {
            if rng.random_bool(0.5) {
                rng.random_range('a'..='z')
            } else {
                rng.random_range('A'..='Z')
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_abstract_has_prefix_and_token() {
        let address = Address::generate(None);
        let Address::Abstract(name) = &address else {
            panic!("expected abstract address, got {address:?}");
        };
        let token = name
            .strip_prefix("/tmp/mdm-session-")
            .expect("name should carry the session prefix");
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn test_generate_in_dir_builds_socket_path() {
        let address = Address::generate(Some(Path::new("/run/mdm")));
        let Address::Path(path) = &address else {
            panic!("expected path address, got {address:?}");
        };
        assert!(path.starts_with("/run/mdm"));
        let file = path.file_name().unwrap().to_string_lossy();
        assert!(file.starts_with(ADDRESS_PREFIX));
    }

    #[test]
    fn test_generate_twice_gives_different_addresses() {
        assert_ne!(Address::generate(None), Address::generate(None));
    }

    #[test]
    fn test_display_abstract() {
        let address = Address::Abstract("/tmp/mdm-session-abcdEFGH".into());
        assert_eq!(
            address.to_string(),
            "unix:abstract=/tmp/mdm-session-abcdEFGH"
        );
    }

    #[test]
    fn test_parse_accepts_both_forms() {
        let a: Address = "unix:abstract=/tmp/x".parse().unwrap();
        assert_eq!(a, Address::Abstract("/tmp/x".into()));

        let p: Address = "unix:path=/run/mdm/sock".parse().unwrap();
        assert_eq!(p, Address::Path(PathBuf::from("/run/mdm/sock")));
    }

    #[test]
    fn test_parse_display_output_gives_same_address() {
        let address = Address::generate(Some(Path::new("/var/run")));
        let parsed: Address = address.to_string().parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        let result = "tcp:host=localhost".parse::<Address>();
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!("unix:abstract=".parse::<Address>().is_err());
        assert!("unix:path=".parse::<Address>().is_err());
    }
}
