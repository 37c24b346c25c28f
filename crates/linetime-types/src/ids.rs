//! Typed identifiers.
//!
//! Blocks, tags and sessions are addressed by UUIDv7 values: unique without
//! a per-document allocator, sortable by creation time, and stable across
//! restarts so the store can refer to them. Request ids are client-chosen
//! integers and only need to be unique within a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! typed_id {
    ($(#[$meta:meta])* $T:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $T(uuid::Uuid);

        impl $T {
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// Leading 8 hex digits. Log output only.
            pub fn short(&self) -> String {
                let mut hex = self.0.simple().to_string();
                hex.truncate(8);
                hex
            }

            /// Accepts hyphenated or plain hex.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                s.parse()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", stringify!($T), self.short())
            }
        }
    };
}

typed_id! {
    /// Address of a block within the session that loaded it.
    BlockId
}

typed_id! {
    /// Address of a tag checkpoint.
    TagId
}

typed_id! {
    /// One client's single-writer session.
    SessionId
}

/// Client-chosen request identifier, unique within one session.
pub type RequestId = u64;
