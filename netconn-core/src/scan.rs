//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use derive_new::new;
use netconn_utils::network::NetworkIdentity;

use crate::debug::Debug;

/// Cached scan results, keyed by the settings name of the IAP they were
/// seen for. Evicted when the settings entry disappears.
#[derive(Debug, Default)]
pub struct ScanCache {
    entries: HashMap<String, Vec<ScanEntry>>,
}

#[derive(Debug, new)]
pub struct ScanEntry {
    pub identity: NetworkIdentity,
    pub seen: DateTime<Utc>,
}

// ===== impl ScanCache =====

impl ScanCache {
    pub fn insert(&mut self, name: &str, entry: ScanEntry) {
        self.entries.entry(name.to_owned()).or_default().push(entry);
    }

    pub fn get(&self, name: &str) -> Option<&[ScanEntry]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Drops all cached results for the named IAP. Invoked through the
    /// settings deletion subscription.
    pub fn remove_iap(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            Debug::ScanCacheEvict(name).log();
        }
        removed
    }
}
