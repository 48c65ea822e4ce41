use crate::logic::types::MinerId;
use crate::utils::config_loader::{
    LoadConfigError, SectionLoader, SectionLoaderSync, load_from_file, load_from_file_sync,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinerEntry {
    pub uid: u16,
    /// `ip:port` as advertised on the network, or a full http(s) URL.
    pub address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RosterConfigRoot {
    pub roster: RosterSection,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterSection {
    #[serde(default)]
    pub miners: Vec<MinerEntry>,
    /// Uids whose answers are taken as the reference.
    #[serde(default)]
    pub trusted: Vec<u16>,
}

#[async_trait]
impl SectionLoader for RosterSection {
    type SectionType = RosterSection;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: RosterConfigRoot = load_from_file(file_name).await?;
        Ok(root.roster)
    }
}

impl SectionLoaderSync for RosterSection {
    type SectionType = RosterSection;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: RosterConfigRoot = load_from_file_sync(file_name)?;
        Ok(root.roster)
    }
}

/// Miners a validator talks to, and the subset it trusts for references.
#[derive(Clone, Debug, Default)]
pub struct MinerRoster {
    endpoints: BTreeMap<MinerId, Url>,
    trusted: BTreeSet<MinerId>,
}

impl MinerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a config section. Entries whose address is neither `ip:port` nor an http(s) URL
    /// are skipped with a warning.
    pub fn from_section(section: &RosterSection) -> Result<Self, LoadConfigError> {
        let ip_port = Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}:\d+$")?;
        let mut roster = Self::new();

        for entry in &section.miners {
            let candidate = if ip_port.is_match(&entry.address) {
                format!("http://{}", entry.address)
            } else {
                entry.address.clone()
            };

            match Url::parse(&candidate) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
                    roster.endpoints.insert(MinerId(entry.uid), url);
                }
                _ => warn!("Skipping miner {} with unusable address {:?}", entry.uid, entry.address),
            }
        }

        for uid in &section.trusted {
            roster.trusted.insert(MinerId(*uid));
        }
        Ok(roster)
    }

    pub fn with_miner(mut self, miner_id: MinerId, endpoint: Url) -> Self {
        self.endpoints.insert(miner_id, endpoint);
        self
    }

    /// Mark a miner as trusted. A trusted miner needs an endpoint only if it is dispatched over HTTP.
    pub fn with_trusted(mut self, miner_id: MinerId) -> Self {
        self.trusted.insert(miner_id);
        self
    }

    pub fn endpoint(&self, miner_id: MinerId) -> Option<&Url> {
        self.endpoints.get(&miner_id)
    }

    pub fn miners(&self) -> Vec<MinerId> {
        self.endpoints.keys().copied().collect()
    }

    pub fn trusted(&self) -> Vec<MinerId> {
        self.trusted.iter().copied().collect()
    }

    pub fn is_trusted(&self, miner_id: MinerId) -> bool {
        self.trusted.contains(&miner_id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
