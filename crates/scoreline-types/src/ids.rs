//! Type-safe identifier wrappers around opaque upstream strings.
//!
//! The upstream feeds identify everything (events, sports, competitions,
//! competitors, statuses, score periods) with opaque strings. Wrapping
//! them prevents an event ID being looked up in the mapping cache, or a
//! mapping ID being used as an event key, at compile time.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw upstream identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the inner [`String`] value.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the upstream sent an empty identifier.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Identifier of a sporting event as sent in the first column of the
    /// event feed.
    EventId
);

define_id!(
    /// Opaque identifier resolved to a human-readable name through the
    /// mapping feed (sport, competition, competitor, status, period type).
    MappingId
);
