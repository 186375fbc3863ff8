//! Update batches for the combined shared hash.
//!
//! One batch carries three disjoint layers: durable entries go to the
//! server inside a transaction, transient entries are broadcast
//! best-effort, local entries never leave the process.

use std::collections::BTreeMap;

/// A set of field updates, split by persistence layer.  An empty value
/// means deletion.
#[derive(Debug, Default, Clone)]
pub struct UpdateBatch {
    durable: BTreeMap<String, String>,
    transient: BTreeMap<String, String>,
    local: BTreeMap<String, String>,
}

impl UpdateBatch {
    pub fn new() -> UpdateBatch {
        UpdateBatch::default()
    }

    /// Replicated through the server with a revision bump.
    pub fn set_durable(&mut self, key: &str, value: &str) {
        self.durable.insert(key.to_owned(), value.to_owned());
    }

    /// Broadcast to current listeners, not persisted.
    pub fn set_transient(&mut self, key: &str, value: &str) {
        self.transient.insert(key.to_owned(), value.to_owned());
    }

    /// Visible only to this process.
    pub fn set_local(&mut self, key: &str, value: &str) {
        self.local.insert(key.to_owned(), value.to_owned());
    }

    pub fn durable(&self) -> &BTreeMap<String, String> {
        &self.durable
    }

    pub fn transient(&self) -> &BTreeMap<String, String> {
        &self.transient
    }

    pub fn local(&self) -> &BTreeMap<String, String> {
        &self.local
    }

    pub fn is_empty(&self) -> bool {
        self.durable.is_empty() && self.transient.is_empty() && self.local.is_empty()
    }
}
