//! Error taxonomy and the diagnostics sink used for recoverable issues.
//!
//! Only [`MftError::MissingRoot`] aborts the construction of an [`crate::Mft`].
//! Everything else is handed to a [`Diagnostics`] implementation and the
//! offending slot, attribute or tree branch is dropped.

use log::warn;
use std::sync::Mutex;
use thiserror::Error;

use crate::attribute::AttributeType;
use crate::record::MftKey;

#[derive(Error, Debug)]
pub enum MftError {
    #[error("malformed record at offset 0x{offset:X}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    #[error("truncated {attribute_type:?} attribute in record at offset 0x{offset:X}: {reason}")]
    TruncatedAttribute {
        offset: u64,
        attribute_type: AttributeType,
        reason: String,
    },

    #[error("record key {key} is already in use, slot at offset 0x{offset:X} moved to bad records")]
    DuplicateKey { key: MftKey, offset: u64 },

    #[error("{length} trailing bytes do not form a complete record and were ignored")]
    TrailingBytes { length: usize },

    #[error("expected exactly one in-use root record (entry 5), found {found}")]
    MissingRoot { found: usize },

    #[error("record {key} references parent {parent} which is not an in-use record")]
    DanglingParentReference { key: MftKey, parent: MftKey },

    #[error("record {key} has no DosWindows, Windows or Posix file name")]
    NoCanonicalName { key: MftKey },

    #[error("parent chain starting at record {key} loops back on itself")]
    ParentCycle { key: MftKey },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MftError>;

/// Receiver for recoverable issues found while parsing or building the tree.
///
/// Results never depend on the sink, `()` can be passed to discard everything.
pub trait Diagnostics: Sync {
    fn report(&self, issue: &MftError);
}

impl Diagnostics for () {
    fn report(&self, _issue: &MftError) {}
}

impl<F> Diagnostics for F
where
    F: Fn(&MftError) + Sync,
{
    fn report(&self, issue: &MftError) {
        self(issue)
    }
}

/// Forwards every issue to the `log` facade at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn report(&self, issue: &MftError) {
        warn!("{}", issue);
    }
}

/// Keeps the rendered message of every reported issue.
#[derive(Debug, Default)]
pub struct Collect {
    messages: Mutex<Vec<String>>,
}

impl Collect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Diagnostics for Collect {
    fn report(&self, issue: &MftError) {
        let mut guard = match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(issue.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn collect_keeps_messages_in_order() {
        let sink = Collect::new();
        sink.report(&MftError::TrailingBytes { length: 12 });
        sink.report(&MftError::MissingRoot { found: 0 });
        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("12 trailing bytes"));
        assert!(messages[1].contains("found 0"));
    }

    #[test]
    fn closures_are_sinks() {
        let count = AtomicUsize::new(0);
        let sink = |_: &MftError| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        sink.report(&MftError::TrailingBytes { length: 1 });
        Diagnostics::report(&sink, &MftError::TrailingBytes { length: 2 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn key_is_rendered_in_messages() {
        let err = MftError::NoCanonicalName {
            key: MftKey::new(0x1F, 3),
        };
        assert_eq!(
            err.to_string(),
            "record 0000001F-00000003 has no DosWindows, Windows or Posix file name"
        );
    }
}
