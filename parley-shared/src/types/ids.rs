use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Declares a transparent string newtype so ids are never confused for one
/// another. The wire representation stays a plain string.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A participant identity, supplied by the auth layer out-of-band.
    ClientId
);

string_id!(
    /// A media router (SFU) instance identity.
    RouterId
);

string_id!(
    /// A meeting code. New codes are 8 uppercase alphanumeric characters.
    MeetingId
);

const MEETING_CODE_LEN: usize = 8;
const MEETING_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

impl MeetingId {
    /// Generate a fresh short meeting code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..MEETING_CODE_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..MEETING_CODE_CHARS.len());
                MEETING_CODE_CHARS[idx] as char
            })
            .collect();
        Self(code)
    }
}

/// Role declared by a connection in its `register` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Client,
    Sfu,
}
