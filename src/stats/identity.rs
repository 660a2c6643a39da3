//! Client identity derived from a log row's address columns

use sha2::{Digest, Sha256};
use std::fmt;

use crate::db::VersionCheckRow;
use crate::error::{StatsError, StatsResult};

/// Hash of the address a request came from. Only used for deduplication,
/// so the hash keeps odd characters in `client_ip_strange` harmless.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity([u8; 32]);

impl ClientIdentity {
    pub fn from_address(address: &str) -> Self {
        Self(Sha256::digest(address.as_bytes()).into())
    }

    /// Use the first present column in priority order: strange, IPv6, IPv4.
    pub fn from_row(row: &VersionCheckRow) -> StatsResult<Self> {
        let address = row
            .client_ip_strange
            .as_deref()
            .or(row.client_ipv6.as_deref())
            .or(row.client_ipv4.as_deref())
            .ok_or_else(|| {
                StatsError::Integrity(format!(
                    "no client address in version check row (user agent {:?})",
                    row.user_agent
                ))
            })?;
        Ok(Self::from_address(address))
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientIdentity({})", &hex::encode(self.0)[..12])
    }
}
