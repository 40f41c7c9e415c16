//! Identity types for Mycelio
//!
//! All identifiers are UUID newtypes so an agent id can never be passed where
//! a task id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Borrow the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an agent (publisher and/or worker)
    AgentId
);

uuid_id!(
    /// Unique identifier for a task
    TaskId
);

uuid_id!(
    /// Unique identifier for a ledger transaction
    TxId
);

/// Privilege tier granted by a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialTier {
    /// Elevated credential: account administration (key rotation)
    Admin,
    /// Standard credential: day-to-day task operations
    Worker,
}

impl CredentialTier {
    /// Fixed, distinguishable prefix carried by credentials of this tier
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::Admin => crate::ADMIN_KEY_PREFIX,
            Self::Worker => crate::WORKER_KEY_PREFIX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Worker => "worker",
        }
    }

    /// Recognise the tier of a raw credential from its prefix
    pub fn from_credential(credential: &str) -> Option<Self> {
        if credential.starts_with(crate::ADMIN_KEY_PREFIX) {
            Some(Self::Admin)
        } else if credential.starts_with(crate::WORKER_KEY_PREFIX) {
            Some(Self::Worker)
        } else {
            None
        }
    }
}

impl fmt::Display for CredentialTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
