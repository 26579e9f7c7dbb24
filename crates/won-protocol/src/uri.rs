//! Resource identifiers.

use serde::{Deserialize, Serialize};

/// Identifier of any remote resource (atom, socket, connection, message).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Wrap a string as a URI.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the URI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is blank. Blank URIs are never indexed.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The atom a socket belongs to.
    ///
    /// Sockets are addressed as fragments of their atom (`<atom>#<socket>`).
    /// Returns `None` if this URI carries no fragment.
    pub fn socket_atom(&self) -> Option<Uri> {
        let (atom, socket) = self.0.split_once('#')?;
        if atom.is_empty() || socket.is_empty() {
            return None;
        }
        Some(Uri::new(atom))
    }
}

impl std::fmt::Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_atom_strips_fragment() {
        let socket = Uri::from("https://node/atom/a1#chatSocket");
        assert_eq!(socket.socket_atom(), Some(Uri::from("https://node/atom/a1")));
    }

    #[test]
    fn socket_atom_requires_fragment() {
        assert_eq!(Uri::from("https://node/atom/a1").socket_atom(), None);
        assert_eq!(Uri::from("https://node/atom/a1#").socket_atom(), None);
    }

    #[test]
    fn blank_uri_is_empty() {
        assert!(Uri::from("  ").is_empty());
        assert!(!Uri::from("x").is_empty());
    }
}
