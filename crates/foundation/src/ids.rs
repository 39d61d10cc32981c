//! Element paths and arena keys
//!
//! Every runtime element has a fully qualified name: the dot-joined
//! [`Path`] from its top-level reactor down to the element itself.
//! Cross-references between elements are typed arena keys minted by
//! the owning environment.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dot-joined path from a top-level reactor to an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path {
    pub segments: Vec<String>,
}

impl Path {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Single-segment path for a top-level element.
    pub fn root(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    /// Path extended by one trailing segment.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    pub fn join(&self, sep: &str) -> String {
        self.segments.join(sep)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self {
            segments: s.split('.').map(String::from).collect(),
        }
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl PartialEq<&str> for Path {
    fn eq(&self, other: &&str) -> bool {
        self.to_string() == *other
    }
}

macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// Keys are minted by the environment that owns the element and
        /// are only meaningful to that environment.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_key!(
    /// Key of a reactor in its environment's arena
    ReactorKey
);

define_key!(
    /// Key of a port in its environment's arena
    PortKey
);

define_key!(
    /// Key of an action in its environment's arena
    ActionKey
);

define_key!(
    /// Key of a reaction in its environment's arena
    ReactionKey
);
