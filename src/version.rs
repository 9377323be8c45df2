//! Bolt protocol versions and the handshake proposal encoding.

use std::fmt;

use crate::error::BoltError;

/// Bolt magic preamble bytes.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// What an HTTP server sends back when it receives the preamble.
const HTTP_REPLY: [u8; 4] = *b"HTTP";

/// Every version the driver can speak, highest first.
pub const SUPPORTED_VERSIONS: [ProtocolVersion; 13] = [
    ProtocolVersion::new(5, 4),
    ProtocolVersion::new(5, 3),
    ProtocolVersion::new(5, 2),
    ProtocolVersion::new(5, 1),
    ProtocolVersion::new(5, 0),
    ProtocolVersion::new(4, 4),
    ProtocolVersion::new(4, 3),
    ProtocolVersion::new(4, 2),
    ProtocolVersion::new(4, 1),
    ProtocolVersion::new(4, 0),
    ProtocolVersion::new(3, 0),
    ProtocolVersion::new(2, 0),
    ProtocolVersion::new(1, 0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parses a 4-byte handshake reply (`00 00 minor major`).
    pub fn from_reply(reply: [u8; 4]) -> Result<Self, BoltError> {
        if reply == HTTP_REPLY {
            return Err(BoltError::Protocol(
                "server responded HTTP; the address is an HTTP port, not a Bolt port".into(),
            ));
        }
        match reply {
            [0, 0, 0, 0] => Err(BoltError::Protocol(
                "server rejected all proposed versions".into(),
            )),
            [_, _, minor, major] => Ok(Self::new(major, minor)),
        }
    }

    /// The 4-byte form sent back by a server.
    pub fn to_reply(self) -> [u8; 4] {
        [0, 0, self.minor, self.major]
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The set of versions a driver is willing to negotiate.
///
/// Injected through the driver configuration so tests and deployments can
/// pin a version without touching the connection code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolTable {
    versions: Vec<ProtocolVersion>,
}

impl ProtocolTable {
    /// Builds a table from `versions`; each must be one the driver speaks.
    pub fn new(versions: impl IntoIterator<Item = ProtocolVersion>) -> Result<Self, BoltError> {
        let mut versions: Vec<_> = versions.into_iter().collect();
        if let Some(v) = versions.iter().find(|v| !SUPPORTED_VERSIONS.contains(v)) {
            return Err(BoltError::Configuration(format!(
                "unsupported Bolt version {v}"
            )));
        }
        versions.sort_unstable_by(|a, b| b.cmp(a));
        versions.dedup();
        if versions.is_empty() {
            return Err(BoltError::Configuration("protocol table is empty".into()));
        }
        Ok(Self { versions })
    }

    /// A table holding one version.
    pub fn only(major: u8, minor: u8) -> Result<Self, BoltError> {
        Self::new([ProtocolVersion::new(major, minor)])
    }

    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    pub fn contains(&self, version: ProtocolVersion) -> bool {
        self.versions.contains(&version)
    }

    /// Encodes up to four handshake proposals, highest first.
    ///
    /// Consecutive minors of one major collapse into a single slot using the
    /// range byte: `[0, range, minor, major]`. Unused slots stay zero.
    pub fn proposals(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let mut slots = out.chunks_exact_mut(4);
        let mut iter = self.versions.iter().peekable();
        while let Some(top) = iter.next() {
            let mut low = top.minor;
            while let Some(next) = iter.peek() {
                if next.major == top.major && next.minor + 1 == low {
                    low = next.minor;
                    iter.next();
                } else {
                    break;
                }
            }
            let Some(slot) = slots.next() else { break };
            slot.copy_from_slice(&[0, top.minor - low, top.minor, top.major]);
        }
        out
    }

    /// Server side of negotiation: the highest table version covered by any
    /// proposal, honouring proposal order.
    #[cfg(test)]
    pub(crate) fn negotiate(&self, proposals: &[u8; 16]) -> Option<ProtocolVersion> {
        proposals.chunks_exact(4).find_map(|slot| {
            let (range, minor, major) = (slot[1], slot[2], slot[3]);
            if major == 0 {
                return None;
            }
            self.versions.iter().copied().find(|v| {
                v.major == major && v.minor <= minor && v.minor >= minor.saturating_sub(range)
            })
        })
    }

    /// Checks a server's reply against the table.
    pub fn select(&self, version: ProtocolVersion) -> Result<ProtocolVersion, BoltError> {
        if self.contains(version) {
            Ok(version)
        } else {
            Err(BoltError::Protocol(format!(
                "server selected Bolt {version}, which was not proposed"
            )))
        }
    }
}

impl Default for ProtocolTable {
    /// Every supported version except 2.0, which would need a fifth
    /// handshake slot. Servers speaking 2.x also accept 1.0.
    fn default() -> Self {
        Self {
            versions: SUPPORTED_VERSIONS
                .iter()
                .copied()
                .filter(|v| v.major != 2)
                .collect(),
        }
    }
}
