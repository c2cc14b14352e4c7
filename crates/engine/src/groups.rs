//! Groups directory
//!
//! Maps group names to their tables and tracks each group's lifecycle:
//! `Creating -> Active -> Deleting -> (gone)`.
//!
//! Every incarnation of a group gets a fresh UUID when it enters `Creating`,
//! and its table is named from the group name plus that id. Leftovers of a
//! previous incarnation therefore never leak into a recreated group.

use crate::group::Group;
use crate::retry::RetryConfig;
use schemata_core::error::{Error, Result};
use schemata_core::fingerprint::{fingerprint, FingerprintFn};
use schemata_core::records::{GroupEntryKey, GroupEntryRecord, GroupState};
use schemata_core::{GroupProperties, RecordKey};
use schemata_storage::provider::TableProvider;
use schemata_storage::table::{TableExt, VersionedTable};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Table name of one incarnation of a group
///
/// Characters outside `[A-Za-z0-9_.-]` are replaced with `_`.
pub fn group_table_name(name: &str, id: &Uuid) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}", sanitized, id)
}

/// Directory of named groups over one table provider
pub struct GroupsDirectory {
    provider: Arc<dyn TableProvider>,
    directory: Arc<dyn VersionedTable>,
    fingerprint: FingerprintFn,
    codec_retry: RetryConfig,
}

impl GroupsDirectory {
    /// Open the directory, creating its table on first use
    pub fn new(provider: Arc<dyn TableProvider>) -> Result<Self> {
        let directory = provider.directory()?;
        Ok(GroupsDirectory {
            provider,
            directory,
            fingerprint,
            codec_retry: RetryConfig::unbounded(),
        })
    }

    /// Builder: fingerprint function handed to every [`Group`]
    pub fn with_fingerprint(mut self, fingerprint: FingerprintFn) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Builder: codec retry policy handed to every [`Group`]
    pub fn with_codec_retry(mut self, codec_retry: RetryConfig) -> Self {
        self.codec_retry = codec_retry;
        self
    }

    /// Create a group unless one with this name exists
    ///
    /// Of any number of concurrent callers for one name, exactly one sees
    /// `true`; it alone initializes the group's table. If that caller dies
    /// half-way, the group stays in `Creating` and the name stays taken.
    pub fn add_new_group(&self, name: &str, properties: &GroupProperties) -> Result<bool> {
        if name.is_empty() {
            return Err(Error::InvalidOperation("group name is empty".to_string()));
        }
        let key = GroupEntryKey {
            name: name.to_string(),
        };
        let id = Uuid::new_v4();
        self.directory.add(
            key.clone(),
            GroupEntryRecord {
                id,
                state: GroupState::Creating,
            },
        )?;

        let entry = match self.directory.get_with_version(&key)? {
            Some(entry) if entry.value.id == id => entry,
            _ => {
                debug!(group = name, "Group already exists");
                return Ok(false);
            }
        };

        let group = self.bind(name, self.provider.create_table(&group_table_name(name, &id))?);
        group.create(properties)?;

        self.directory.update(
            key,
            GroupEntryRecord {
                id,
                state: GroupState::Active,
            },
            Some(entry.version),
        )?;
        info!(group = name, %id, "Group is active");
        Ok(true)
    }

    /// Open an active group
    ///
    /// # Errors
    ///
    /// - `NotFound` if no group has this name
    /// - `IllegalState` if the group is still being created or is being deleted
    pub fn get_group(&self, name: &str) -> Result<Group> {
        let entry = self
            .directory
            .get(&GroupEntryKey {
                name: name.to_string(),
            })?
            .ok_or_else(|| Error::NotFound(format!("group {}", name)))?;
        if entry.state != GroupState::Active {
            return Err(Error::IllegalState(format!(
                "group {} is {}",
                name, entry.state
            )));
        }
        let table = self.provider.open_table(&group_table_name(name, &entry.id))?;
        Ok(self.bind(name, table))
    }

    /// Names of active groups, sorted
    pub fn list_groups(&self) -> Result<Vec<String>> {
        let entries = self
            .directory
            .get_all_entries(&|k| matches!(k, RecordKey::GroupEntryKey(_)))?;
        let mut names = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let record = GroupEntryRecord::try_from(value.into_value())?;
            if let (RecordKey::GroupEntryKey(k), GroupState::Active) = (key, record.state) {
                names.push(k.name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a group and its table; no-op if it does not exist
    ///
    /// A group still in `Creating` is left alone. A group found in `Deleting`
    /// (an earlier delete died half-way) is finished off.
    pub fn delete_group(&self, name: &str) -> Result<()> {
        let key = GroupEntryKey {
            name: name.to_string(),
        };
        let entry = match self.directory.get_with_version(&key)? {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let id = entry.value.id;
        let version = match entry.value.state {
            GroupState::Creating => {
                debug!(group = name, "Not deleting group that is still being created");
                return Ok(());
            }
            GroupState::Active => {
                info!(group = name, %id, "Deleting group");
                self.directory.update(
                    key.clone(),
                    GroupEntryRecord {
                        id,
                        state: GroupState::Deleting,
                    },
                    Some(entry.version),
                )?
            }
            GroupState::Deleting => entry.version,
        };

        self.provider.delete_table(&group_table_name(name, &id))?;
        match self.directory.remove_entry(&key.clone().into(), Some(version)) {
            Ok(()) => {}
            // Lost a race with another deleter of the same incarnation
            Err(e) if e.is_conflict() => {
                if let Some(current) = self.directory.get(&key)? {
                    if current.id == id {
                        return Err(e);
                    }
                }
            }
            Err(e) => return Err(e),
        }
        info!(group = name, %id, "Deleted group");
        Ok(())
    }

    fn bind(&self, name: &str, table: Arc<dyn VersionedTable>) -> Group {
        Group::new(name, table)
            .with_fingerprint(self.fingerprint)
            .with_codec_retry(self.codec_retry.clone())
    }
}
