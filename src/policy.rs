//! Client IP Allow-Listing
//!
//! Every request is checked against an [`AllowList`] before anything else
//! runs. The list is built once at start-up and never changes; share it
//! behind an `Arc`.
//!
//! Entries are either single addresses (`192.168.1.10`, `::1`) or networks
//! in CIDR notation (`10.0.0.0/8`). Host bits in a network entry are
//! ignored, so `10.1.2.3/8` admits all of `10.0.0.0/8`.

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Environment variable holding a comma-separated allow list
pub const ALLOWED_IPS_ENV: &str = "BACKUP_VALIDATOR_ALLOWED_IPS";

/// Loopback and private-network ranges used when nothing is configured
pub const DEFAULT_ALLOWED: &[&str] = &[
    "127.0.0.0/8",
    "::1",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "fc00::/7",
];

/// Error types for allow-list entries
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntryParseError {
    #[error("'{0}' is not a valid IP address")]
    InvalidAddress(String),

    #[error("'{0}' has an invalid prefix length")]
    InvalidPrefix(String),
}

/// One allow-list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowEntry {
    Host(IpAddr),
    Network { addr: IpAddr, prefix: u8 },
}

impl AllowEntry {
    /// Whether `candidate` is this address or inside this network
    pub fn contains(&self, candidate: IpAddr) -> bool {
        match *self {
            AllowEntry::Host(addr) => addr == candidate,
            AllowEntry::Network { addr, prefix } => match (addr, candidate) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    let mask = prefix_mask_u32(prefix);
                    u32::from(net) & mask == u32::from(ip) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    let mask = prefix_mask_u128(prefix);
                    u128::from(net) & mask == u128::from(ip) & mask
                }
                _ => false,
            },
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    32u32
        .checked_sub(u32::from(prefix))
        .and_then(|shift| u32::MAX.checked_shl(shift))
        .unwrap_or(0)
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    128u32
        .checked_sub(u32::from(prefix))
        .and_then(|shift| u128::MAX.checked_shl(shift))
        .unwrap_or(0)
}

/// IPv4-mapped networks (`::ffff:a.b.c.d/n`) become plain IPv4 networks so
/// they match the canonical candidates. Their prefix must cover the mapping.
fn canonical_network(addr: IpAddr, prefix: u8) -> Option<AllowEntry> {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => Some(AllowEntry::Network {
                addr: IpAddr::V4(v4),
                prefix: prefix.checked_sub(96)?,
            }),
            None => Some(AllowEntry::Network { addr, prefix }),
        },
        IpAddr::V4(_) => Some(AllowEntry::Network { addr, prefix }),
    }
}

impl FromStr for AllowEntry {
    type Err = EntryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((addr, prefix)) => {
                let addr: IpAddr = addr
                    .parse()
                    .map_err(|_| EntryParseError::InvalidAddress(s.to_string()))?;
                let max = if addr.is_ipv4() { 32 } else { 128 };
                let prefix: u8 = prefix
                    .parse()
                    .ok()
                    .filter(|p| *p <= max)
                    .ok_or_else(|| EntryParseError::InvalidPrefix(s.to_string()))?;
                canonical_network(addr, prefix)
                    .ok_or_else(|| EntryParseError::InvalidPrefix(s.to_string()))
            }
            None => s
                .parse::<IpAddr>()
                .map(|addr| AllowEntry::Host(addr.to_canonical()))
                .map_err(|_| EntryParseError::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for AllowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowEntry::Host(addr) => write!(f, "{}", addr),
            AllowEntry::Network { addr, prefix } => write!(f, "{}/{}", addr, prefix),
        }
    }
}

/// Ordered, immutable set of allowed addresses and networks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<AllowEntry>,
}

impl AllowList {
    /// Build a list from textual entries, skipping (and logging) invalid ones
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .filter_map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.is_empty() {
                    return None;
                }
                match raw.parse::<AllowEntry>() {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Ignoring allow-list entry: {}", e);
                        None
                    }
                }
            })
            .collect();
        Self { entries }
    }

    /// Parse a comma-separated list
    pub fn from_csv(list: &str) -> Self {
        Self::from_entries(list.split(','))
    }

    /// Parse file contents: one entry per line, `#` comments and blank lines ignored
    pub fn from_lines(contents: &str) -> Self {
        Self::from_entries(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        )
    }

    /// Read a list from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read allow list from {:?}", path))?;
        Ok(Self::from_lines(&contents))
    }

    /// Loopback and private networks
    pub fn default_private() -> Self {
        Self::from_entries(DEFAULT_ALLOWED)
    }

    pub fn entries(&self) -> &[AllowEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where the allow list may come from, in priority order
#[derive(Debug, Clone, Default)]
pub struct AllowListSource<'a> {
    /// Value of [`ALLOWED_IPS_ENV`], if set
    pub env: Option<String>,

    /// Inline entries from the config file
    pub inline: &'a [String],

    /// Allow-list file path
    pub file: Option<&'a Path>,
}

impl AllowListSource<'_> {
    /// Pick the first configured source and build the list from it
    ///
    /// # Errors
    ///
    /// Returns an error if the allow-list file exists but cannot be read.
    pub fn load(&self) -> Result<AllowList> {
        if let Some(env) = self.env.as_deref().filter(|v| !v.trim().is_empty()) {
            info!("Loading allow list from {}", ALLOWED_IPS_ENV);
            return Ok(AllowList::from_csv(env));
        }

        if !self.inline.is_empty() {
            info!("Loading allow list from configuration");
            return Ok(AllowList::from_entries(self.inline));
        }

        if let Some(path) = self.file.filter(|p| p.exists()) {
            info!("Loading allow list from {:?}", path);
            return AllowList::from_file(path);
        }

        info!("No allow list configured, allowing loopback and private networks");
        Ok(AllowList::default_private())
    }
}

/// Decides whether a caller may use the service
#[derive(Debug, Clone)]
pub struct IpPolicy {
    allow_list: AllowList,
}

impl IpPolicy {
    pub fn new(allow_list: AllowList) -> Self {
        if allow_list.is_empty() {
            warn!("Allow list is empty, every request will be denied");
        }
        Self { allow_list }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Check a textual address; unparseable input is denied
    pub fn is_allowed(&self, candidate: &str) -> bool {
        match candidate.trim().parse::<IpAddr>() {
            Ok(addr) => self.is_allowed_addr(addr),
            Err(_) => {
                warn!(address = candidate, "Denying request with unparseable client address");
                false
            }
        }
    }

    /// Check an address against every entry
    pub fn is_allowed_addr(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        let allowed = self.allow_list.entries.iter().any(|entry| entry.contains(addr));
        debug!(address = %addr, allowed, "Checked client address");
        allowed
    }
}
