// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.
//!
//! Control-plane callers mint their own run/task/repository ids, so ids are
//! backed by [`SmolStr`] rather than a fixed inline buffer: short ids stay
//! allocation-free, arbitrary caller-supplied ids still round-trip intact.

use smol_str::SmolStr;

/// Define a newtype ID wrapper with a type prefix.
///
/// Generates `generate()` for random ID creation (`{prefix}{nanoid(19)}`),
/// `from_string()` for caller-supplied ids (accepted verbatim, with or
/// without the prefix), `as_str()`, `is_empty()`, `Display`, `From`,
/// `PartialEq<str>`, and `Borrow<str>` implementations.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(pub smol_str::SmolStr);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn generate() -> Self {
                Self(smol_str::SmolStr::new(format!(
                    "{}{}",
                    Self::PREFIX,
                    nanoid::nanoid!(19)
                )))
            }

            /// Create an ID from an existing string, verbatim.
            pub fn from_string(id: impl AsRef<str>) -> Self {
                Self(smol_str::SmolStr::new(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0.as_str() == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

define_id! {
    /// Globally unique identifier for a single run attempt.
    pub struct RunId("run-");
}

define_id! {
    /// Identifier for a task (a reusable recipe producing runs).
    pub struct TaskId("task-");
}

define_id! {
    /// Identifier for a repository.
    pub struct RepositoryId("repo-");
}

define_id! {
    /// Identifier for an ad-hoc command execution on a worker.
    pub struct CommandId("cmd-");
}

define_id! {
    /// Identifier for a streamed artifact within a run.
    pub struct ArtifactId("art-");
}

define_id! {
    /// Identifier for a task-runtime worker instance.
    pub struct RuntimeId("rt-");
}

/// Opaque token binding an event stream to one execution attempt.
///
/// Retried attempts of the same run get distinct tokens, so consumers can
/// disambiguate their event streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default)]
#[serde(transparent)]
pub struct ExecutionToken(pub SmolStr);

impl ExecutionToken {
    pub fn generate() -> Self {
        Self(SmolStr::new(format!("exc-{}", nanoid::nanoid!(19))))
    }

    pub fn from_string(token: impl AsRef<str>) -> Self {
        Self(SmolStr::new(token.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionToken {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
