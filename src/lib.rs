// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use log::{debug, error, info};

pub mod attribute;
pub mod data;
pub mod error;
pub mod record;
pub mod tree;

pub use attribute::{Attribute, AttributeType, AttributeValue, FileName, NameNamespace};
pub use error::{Collect, Diagnostics, LogDiagnostics, MftError, Result};
pub use record::{FileRecord, MftKey, RECORD_SIZE, RecordStatus};
pub use tree::{BuildReport, DirectoryItem};

/// Entry number of the volume root directory.
pub const ROOT_ENTRY_NUMBER: u64 = 5;

/// Knobs for [`Mft::with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParseOptions {
    /// Decode slots on the rayon thread pool. Results are merged in buffer order either way.
    pub parallel: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// A parsed Master File Table, its records bucketed by classification.
#[derive(Debug, Clone)]
pub struct Mft {
    pub file_records: BTreeMap<MftKey, FileRecord>,
    pub free_file_records: BTreeMap<MftKey, FileRecord>,
    pub bad_records: Vec<FileRecord>,
    pub uninitialized_records: Vec<FileRecord>,
    pub root_directory: DirectoryItem,
    root_key: MftKey,
}

impl Mft {
    /// Parse a raw MFT image with default options, discarding diagnostics.
    pub fn new(raw: &[u8]) -> Result<Self> {
        Self::with_options(raw, ParseOptions::default(), &())
    }

    /// Parse a raw MFT image. Only a missing or duplicated root record is fatal.
    pub fn with_options(
        raw: &[u8],
        options: ParseOptions,
        diagnostics: &dyn Diagnostics,
    ) -> Result<Self> {
        let trailing = raw.len() % RECORD_SIZE;
        if trailing != 0 {
            diagnostics.report(&MftError::TrailingBytes { length: trailing });
        }

        let decode = |(index, slot): (usize, &[u8])| {
            FileRecord::from_bytes(slot, (index * RECORD_SIZE) as u64, diagnostics)
        };
        let records: Vec<FileRecord> = if options.parallel {
            raw.par_chunks_exact(RECORD_SIZE)
                .enumerate()
                .map(decode)
                .collect()
        } else {
            raw.chunks_exact(RECORD_SIZE).enumerate().map(decode).collect()
        };
        debug!("Decoded {} MFT slots", records.len());

        // counted before bucketing so a second slot claiming the root key is not hidden
        let roots: Vec<MftKey> = records
            .iter()
            .filter(|r| r.is_in_use() && r.entry_number == ROOT_ENTRY_NUMBER)
            .map(FileRecord::key)
            .collect();
        let root_key = match roots.as_slice() {
            [key] => *key,
            _ => {
                error!("Expected a single root record, found {}", roots.len());
                return Err(MftError::MissingRoot { found: roots.len() });
            }
        };

        let mut file_records = BTreeMap::new();
        let mut free_file_records = BTreeMap::new();
        let mut bad_records = Vec::new();
        let mut uninitialized_records = Vec::new();

        for mut record in records {
            let bucket = match record.status() {
                RecordStatus::InUse => &mut file_records,
                RecordStatus::Free => &mut free_file_records,
                RecordStatus::Bad => {
                    bad_records.push(record);
                    continue;
                }
                RecordStatus::Uninitialized => {
                    uninitialized_records.push(record);
                    continue;
                }
            };
            match bucket.entry(record.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(_) => {
                    diagnostics.report(&MftError::DuplicateKey {
                        key: record.key(),
                        offset: record.offset,
                    });
                    record.is_duplicate = true;
                    bad_records.push(record);
                }
            }
        }

        info!(
            "MFT parsed: {} in use, {} free, {} bad, {} uninitialized",
            file_records.len(),
            free_file_records.len(),
            bad_records.len(),
            uninitialized_records.len()
        );

        Ok(Self {
            file_records,
            free_file_records,
            bad_records,
            uninitialized_records,
            root_directory: DirectoryItem::root(root_key),
            root_key,
        })
    }

    pub fn root_key(&self) -> MftKey {
        self.root_key
    }

    /// In-use record for `key`.
    pub fn get(&self, key: &MftKey) -> Option<&FileRecord> {
        self.file_records.get(key)
    }

    /// In-use record with this entry number, whatever its sequence number.
    pub fn find_entry(&self, entry_number: u64) -> Option<&FileRecord> {
        self.file_records
            .range(MftKey::new(entry_number, 0)..=MftKey::new(entry_number, u16::MAX))
            .map(|(_, r)| r)
            .next()
    }

    /// Total number of slots held in all four buckets.
    pub fn record_count(&self) -> usize {
        self.file_records.len()
            + self.free_file_records.len()
            + self.bad_records.len()
            + self.uninitialized_records.len()
    }

    /// Rebuild the directory tree under [`Mft::root_directory`], discarding diagnostics.
    pub fn build_file_system(&mut self) -> BuildReport {
        self.build_file_system_with(&())
    }

    /// Rebuild the directory tree. Running it again over the same records adds nothing.
    pub fn build_file_system_with(&mut self, diagnostics: &dyn Diagnostics) -> BuildReport {
        tree::build_tree(
            &mut self.root_directory,
            self.root_key,
            &self.file_records,
            diagnostics,
        )
    }
}
