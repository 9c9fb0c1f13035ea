//! Directory tree reconstruction from parent back-references.
//!
//! Records only know their parent. For every name of every base record the
//! chain of parents is walked up to the root, then materialized top-down,
//! reusing nodes created for earlier records. Insertion is insert-if-absent,
//! so the result does not depend on the order records are visited in.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use crate::attribute::{FileName, NameNamespace};
use crate::error::{Diagnostics, MftError, Result};
use crate::record::{FileRecord, MftKey};

pub const PATH_SEPARATOR: char = '\\';
pub const ROOT_PARENT_PATH: &str = ".";

/// A node of the reconstructed tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DirectoryItem {
    pub name: String,
    /// Record key; file items carry an extra `-XXXXXXXX` attribute number.
    pub key: String,
    pub parent_path: String,
    pub children: BTreeMap<String, DirectoryItem>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    root: bool,
}

impl DirectoryItem {
    pub fn new(name: impl Into<String>, key: impl Into<String>, parent_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            parent_path: parent_path.into(),
            children: BTreeMap::new(),
            root: false,
        }
    }

    pub fn root(key: MftKey) -> Self {
        Self {
            root: true,
            ..Self::new("", key.to_string(), ROOT_PARENT_PATH)
        }
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Path of this item; children of the root start with `.\`.
    pub fn full_path(&self) -> String {
        if self.is_root() {
            ROOT_PARENT_PATH.to_string()
        } else {
            format!("{}{}{}", self.parent_path, PATH_SEPARATOR, self.name)
        }
    }

    /// Depth-first, pre-order traversal yielding `(depth, item)`; the root has depth 0.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(0, self)],
        }
    }

    /// All items below this one whose name equals `name` (ASCII case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Vec<&DirectoryItem> {
        self.walk()
            .skip(1)
            .map(|(_, item)| item)
            .filter(|item| item.name.eq_ignore_ascii_case(name))
            .collect()
    }

    /// Number of items below this one.
    pub fn descendant_count(&self) -> usize {
        self.walk().count() - 1
    }
}

pub struct Walk<'a> {
    stack: Vec<(usize, &'a DirectoryItem)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a DirectoryItem);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, item) = self.stack.pop()?;
        self.stack
            .extend(item.children.values().rev().map(|child| (depth + 1, child)));
        Some((depth, item))
    }
}

/// Counters returned by a tree build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BuildReport {
    /// Names that produced a new leaf item.
    pub inserted: usize,
    /// Names whose item was already in the tree.
    pub already_present: usize,
    /// Names dropped because their parent chain could not be resolved.
    pub skipped: usize,
}

/// Populate `root` from the in-use records. Failures only drop the branch
/// being built and are handed to `diagnostics`.
pub fn build_tree(
    root: &mut DirectoryItem,
    root_key: MftKey,
    records: &BTreeMap<MftKey, FileRecord>,
    diagnostics: &dyn Diagnostics,
) -> BuildReport {
    let mut report = BuildReport::default();

    for record in records.values() {
        // extension records are reached through the attribute list of their base record
        if !record.is_base_record() {
            trace!("Skipping extension record {}", record.key());
            continue;
        }
        if record.key() == root_key {
            continue;
        }

        for (attribute_id, file_name) in record.file_names() {
            if file_name.namespace == NameNamespace::Dos {
                continue;
            }
            match insert_name(root, root_key, records, record, attribute_id, file_name) {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.already_present += 1,
                Err(e) => {
                    diagnostics.report(&e);
                    report.skipped += 1;
                }
            }
        }
    }

    debug!(
        "Directory tree built: {} inserted, {} already present, {} skipped",
        report.inserted, report.already_present, report.skipped
    );
    report
}

/// Directories between the root (excluded) and the immediate parent of
/// `file_name`, root side first, each with the name it is labelled with.
fn ancestor_chain<'a>(
    root_key: MftKey,
    records: &'a BTreeMap<MftKey, FileRecord>,
    record: &FileRecord,
    file_name: &FileName,
) -> Result<Vec<(MftKey, &'a str)>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut child = record.key();
    let mut parent = file_name.parent_reference;

    while parent != root_key {
        if !seen.insert(parent) {
            return Err(MftError::ParentCycle { key: record.key() });
        }
        let parent_record = records
            .get(&parent)
            .ok_or(MftError::DanglingParentReference { key: child, parent })?;
        let name = parent_record
            .canonical_name()
            .ok_or(MftError::NoCanonicalName { key: parent })?;
        chain.push((parent, name.name.as_str()));

        let (_, first) = parent_record
            .file_names()
            .next()
            .ok_or(MftError::NoCanonicalName { key: parent })?;
        child = parent;
        parent = first.parent_reference;
    }

    chain.reverse();
    Ok(chain)
}

/// Returns `Ok(true)` when a new item was added for `file_name`.
fn insert_name(
    root: &mut DirectoryItem,
    root_key: MftKey,
    records: &BTreeMap<MftKey, FileRecord>,
    record: &FileRecord,
    attribute_id: u16,
    file_name: &FileName,
) -> Result<bool> {
    // resolve everything before touching the tree so a failure leaves it unchanged
    let chain = ancestor_chain(root_key, records, record, file_name)?;

    let mut node = root;
    let mut path = node.full_path();
    for (key, name) in chain {
        let key = key.to_string();
        let parent_path = path;
        node = node
            .children
            .entry(key.clone())
            .or_insert_with(|| DirectoryItem::new(name, key, parent_path));
        path = node.full_path();
    }

    let item_key = if file_name.is_directory() {
        record.key().to_string()
    } else {
        // one record may expose several named streams
        format!("{}-{:08X}", record.key(), attribute_id)
    };

    match node.children.entry(item_key) {
        Entry::Vacant(slot) => {
            let item = DirectoryItem::new(file_name.name.clone(), slot.key().clone(), path);
            slot.insert(item);
            Ok(true)
        }
        Entry::Occupied(_) => Ok(false),
    }
}
