//! Duplicate RAOP sink reduction
//!
//! `PulseAudio` sometimes advertises one speaker several times (IPv4 and IPv6
//! announcements, for instance), each copy owned by its own `module-raop-sink`
//! instance. The reducer keeps one owner per speaker and unloads the rest.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::command::{CommandError, CommandRunner};
use crate::module::ModuleHandle;
use crate::pactl::AudioCtl;

/// One sink from `pactl list sinks`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRecord {
    pub name: String,
    pub owner_module: ModuleHandle,
}

/// Sinks considered the same speaker, with their distinct owner modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkGroup {
    pub name: String,
    /// Distinct owners in discovery order
    pub owners: Vec<ModuleHandle>,
}

#[derive(Debug, Default)]
struct Pending {
    name: Option<String>,
    owner: Option<ModuleHandle>,
}

impl Pending {
    fn take_complete(&mut self) -> Option<SinkRecord> {
        if self.name.is_some() && self.owner.is_some() {
            let name = self.name.take()?;
            let owner_module = self.owner.take()?;
            return Some(SinkRecord { name, owner_module });
        }
        None
    }
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.trim_start()
        .strip_prefix(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Parse the record format of `pactl list sinks`
///
/// A `Sink #` line starts a new record and discards any half-read one. A
/// record is emitted once both `Name:` and `Owner Module:` have been seen.
/// Sinks without an owner (created by the server itself) are skipped.
#[must_use]
pub fn parse_sink_records<S: AsRef<str>>(lines: &[S]) -> Vec<SinkRecord> {
    let mut records = Vec::new();
    let mut pending = Pending::default();

    for line in lines.iter().map(AsRef::as_ref) {
        if line.starts_with("Sink #") {
            pending = Pending::default();
            continue;
        }
        if let Some(name) = field(line, "Name:") {
            pending.name = Some(name.to_string());
        } else if let Some(owner) = field(line, "Owner Module:") {
            pending.owner = ModuleHandle::parse_id(owner);
        }
        if let Some(record) = pending.take_complete() {
            records.push(record);
        }
    }

    records
}

/// Group records naming the same speaker
///
/// Only names containing `marker` are kept. Names are visited in sorted
/// order and a name starting with the current group's name joins that group,
/// so `Speaker` and `Speaker #2` collapse into `Speaker`. This also merges a
/// speaker whose name happens to extend another's (`Kitchen` and
/// `Kitchen Left`); that approximation is accepted.
///
/// Names sort by byte order rather than locale collation, so `Zone` comes
/// before `attic`. Only the adjacency of a name and its suffixed copies
/// matters, and byte order keeps those together.
#[must_use]
pub fn group_owners(records: &[SinkRecord], marker: &str) -> Vec<SinkGroup> {
    let mut by_name: BTreeMap<&str, Vec<ModuleHandle>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.name.contains(marker)) {
        let owners = by_name.entry(record.name.as_str()).or_default();
        if !owners.contains(&record.owner_module) {
            owners.push(record.owner_module.clone());
        }
    }

    let mut groups: Vec<SinkGroup> = Vec::new();
    for (name, owners) in by_name {
        match groups.last_mut() {
            Some(group) if name.starts_with(group.name.as_str()) => {
                for owner in owners {
                    if !group.owners.contains(&owner) {
                        group.owners.push(owner);
                    }
                }
            }
            _ => groups.push(SinkGroup {
                name: name.to_string(),
                owners,
            }),
        }
    }
    groups
}

/// Every owner after the first in each group
#[must_use]
pub fn duplicate_owners(groups: &[SinkGroup]) -> Vec<ModuleHandle> {
    groups
        .iter()
        .flat_map(|group| group.owners.iter().skip(1).cloned())
        .collect()
}

/// Unloads redundant RAOP sink owners
#[derive(Debug, Clone)]
pub struct DuplicateSinkReducer {
    marker: String,
}

impl DuplicateSinkReducer {
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Unload duplicate owners and return the handles actually unloaded
    ///
    /// A disabled preference makes this a no-op. A failed unload is logged and
    /// left out of the result; the remaining duplicates are still attempted.
    ///
    /// # Errors
    /// Returns the [`CommandError`] if the sink listing fails.
    pub async fn reduce<R: CommandRunner>(
        &self,
        ctl: &AudioCtl<R>,
        enabled: bool,
    ) -> Result<Vec<ModuleHandle>, CommandError> {
        if !enabled {
            debug!("Duplicate sink reduction disabled");
            return Ok(Vec::new());
        }

        let lines = ctl.run(&ctl.pactl().list_sinks()).await?;
        let groups = group_owners(&parse_sink_records(&lines), &self.marker);
        let duplicates = duplicate_owners(&groups);
        if duplicates.is_empty() {
            debug!("No duplicate RAOP sinks among {} speakers", groups.len());
            return Ok(Vec::new());
        }

        let mut unloaded = Vec::with_capacity(duplicates.len());
        for handle in duplicates {
            match ctl.run(&ctl.pactl().unload_module(&handle)).await {
                Ok(_) => unloaded.push(handle),
                Err(e) => warn!("Failed to unload duplicate sink owner {}: {}", handle, e),
            }
        }

        if !unloaded.is_empty() {
            let ids: Vec<&str> = unloaded.iter().map(ModuleHandle::as_str).collect();
            info!("Unloaded duplicate RAOP sink owners: {}", ids.join(", "));
        }
        Ok(unloaded)
    }
}
