//! In-memory stand-in for the external store.

use crate::loader::StoreClient;
use anyhow::{Result, bail};
use std::sync::Mutex;

/// A [`StoreClient`] that remembers every statement it is given.
///
/// Statements containing any substring registered with
/// [`RecordingStore::fail_on`] are rejected (and still recorded).
///
/// ```
/// use chunkline::loader::StoreClient;
/// use chunkline::testing::RecordingStore;
///
/// let store = RecordingStore::new();
/// store.fail_on("broken");
/// assert!(store.execute("LOAD 'ok.csv'").is_ok());
/// assert!(store.execute("LOAD 'broken.csv'").is_err());
/// assert_eq!(store.statements().len(), 2);
/// assert_eq!(store.rejected(), 1);
/// ```
#[derive(Default)]
pub struct RecordingStore {
    statements: Mutex<Vec<String>>,
    fail_on: Mutex<Vec<String>>,
    rejected: Mutex<usize>,
}

impl RecordingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject statements containing `needle` from now on.
    pub fn fail_on(&self, needle: impl Into<String>) {
        if let Ok(mut f) = self.fail_on.lock() {
            f.push(needle.into());
        }
    }

    /// All statements received so far, in arrival order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of statements rejected.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.rejected.lock().map(|r| *r).unwrap_or_default()
    }
}

impl StoreClient for RecordingStore {
    fn execute(&self, statement: &str) -> Result<()> {
        if let Ok(mut s) = self.statements.lock() {
            s.push(statement.to_string());
        }
        let failing = self
            .fail_on
            .lock()
            .map(|f| f.iter().any(|needle| statement.contains(needle.as_str())))
            .unwrap_or(false);
        if failing {
            if let Ok(mut r) = self.rejected.lock() {
                *r += 1;
            }
            bail!("store rejected statement: {statement}");
        }
        Ok(())
    }
}
