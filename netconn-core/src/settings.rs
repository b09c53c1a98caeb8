//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use itertools::Itertools;
use netconn_utils::Database;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::Error;

// Base of the connectivity settings tree, and the IAP subtree under it.
pub const SETTINGS_BASE: &str = "/system/osso/connectivity";
pub const SETTINGS_ROOT: &str = "/system/osso/connectivity/IAP";

// Per-IAP keys.
pub const KEY_TYPE: &str = "type";
pub const KEY_NAME: &str = "name";
pub const KEY_IS_TEMPORARY: &str = "temporary";

// Temporary IAPs created by the connection wizard carry this name prefix
// even when the temporary key is missing.
const TEMPORARY_NAME_PREFIX: &str = "[Easy";

type DeletionCb = Box<dyn Fn(&str) + Send + Sync>;

/// Facade over the persistent settings tree.
///
/// Settings names are percent-style escaped before being used as tree
/// keys; deletion subscribers receive the unescaped name of any removed
/// top-level entry.
pub struct Settings {
    db: Database,
    deletion_cbs: Vec<DeletionCb>,
}

// ===== impl Settings =====

impl Settings {
    pub fn new(db: Database) -> Settings {
        Settings {
            db,
            deletion_cbs: Vec::new(),
        }
    }

    /// Subscribes to top-level entry deletions. Single-reader by
    /// convention; the callback gets the unescaped settings name.
    pub fn subscribe_deletions(&mut self, cb: DeletionCb) {
        self.deletion_cbs.push(cb);
    }

    /// Fetches a boolean key, logging and returning the default on any
    /// store error.
    pub fn get_bool(&self, iap: Option<&str>, key: &str, default: bool) -> bool {
        self.get::<bool>(iap, key).unwrap_or(default)
    }

    /// Fetches a string key. Absent and unreadable keys are both `None`.
    pub fn get_string(&self, iap: Option<&str>, key: &str) -> Option<String> {
        self.get::<String>(iap, key)
    }

    /// Writes a string key. Returns false when the store is unavailable.
    pub fn set_string(&self, iap: Option<&str>, key: &str, value: &str) -> bool {
        self.set(iap, key, &value.to_owned())
    }

    /// Writes a boolean key. Returns false when the store is unavailable.
    pub fn set_bool(&self, iap: Option<&str>, key: &str, value: bool) -> bool {
        self.set(iap, key, &value)
    }

    /// An IAP is temporary when its settings carry `temporary = true` or
    /// its name carries the wizard prefix.
    pub fn is_temporary(&self, iap: Option<&str>) -> bool {
        let Some(name) = iap else {
            return false;
        };

        if self.get_bool(Some(name), KEY_IS_TEMPORARY, false) {
            debug!(%name, "settings is a temporary IAP because of the temporary key");
            return true;
        }
        if name.starts_with(TEMPORARY_NAME_PREFIX) {
            debug!(%name, "settings is a temporary IAP because of the name prefix");
            return true;
        }

        false
    }

    /// Removes one temporary entry, or sweeps all of them when no name is
    /// given. Returns true if anything was removed. Non-temporary entries
    /// are never unset.
    pub fn remove_temporary(&mut self, iap: Option<&str>) -> bool {
        match iap {
            Some(name) => self.remove_if_temporary(name),
            None => {
                let mut removed = false;
                for name in self.iap_names() {
                    if self.remove_if_temporary(&name) {
                        removed = true;
                    }
                }
                removed
            }
        }
    }

    /// Moves the settings subtree of `old` to `new`. Returns false when
    /// there was nothing to move or the store is unavailable.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        let old_prefix = format!("{}/{}/", SETTINGS_ROOT, escape_key(old));
        let new_prefix = format!("{}/{}/", SETTINGS_ROOT, escape_key(new));

        let Ok(mut db) = self.db.lock() else {
            Error::SettingsUnavailable(old_prefix).log();
            return false;
        };

        let keys = db
            .get_all()
            .into_iter()
            .filter(|key| key.starts_with(&old_prefix))
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return false;
        }

        for key in keys {
            let new_key = format!("{}{}", new_prefix, &key[old_prefix.len()..]);
            if let Some(value) = db.get::<serde_json::Value>(&key) {
                if db.set(&new_key, &value).is_err() {
                    Error::SettingsUnavailable(new_key).log();
                    return false;
                }
            }
            let _ = db.rem(&key);
        }
        drop(db);

        // The old entry disappeared from the tree.
        self.notify_deleted(old);

        true
    }

    /// Unescaped names of all top-level entries.
    pub fn iap_names(&self) -> Vec<String> {
        let prefix = format!("{SETTINGS_ROOT}/");

        let Ok(db) = self.db.lock() else {
            return Vec::new();
        };

        db.get_all()
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                let (child, _) = rest.split_once('/')?;
                Some(unescape_key(child))
            })
            .unique()
            .collect()
    }

    // Fetches a typed key, NULL-safe on the settings name.
    fn get<T: DeserializeOwned + 'static>(
        &self,
        iap: Option<&str>,
        key: &str,
    ) -> Option<T> {
        let key = key_path(iap, key);
        match self.db.lock() {
            Ok(db) => db.get::<T>(&key),
            Err(_) => {
                Error::SettingsUnavailable(key).log();
                None
            }
        }
    }

    fn set<T: Serialize>(&self, iap: Option<&str>, key: &str, value: &T) -> bool {
        let key = key_path(iap, key);
        match self.db.lock() {
            Ok(mut db) => match db.set(&key, value) {
                Ok(()) => true,
                Err(_) => {
                    Error::SettingsUnavailable(key).log();
                    false
                }
            },
            Err(_) => {
                Error::SettingsUnavailable(key).log();
                false
            }
        }
    }

    fn remove_if_temporary(&mut self, name: &str) -> bool {
        if !self.is_temporary(Some(name)) {
            return false;
        }
        if self.remove_subtree(name) {
            debug!(%name, "removed temporary IAP settings");
            true
        } else {
            false
        }
    }

    // Removes every key under the entry and notifies subscribers once.
    fn remove_subtree(&mut self, name: &str) -> bool {
        let prefix = format!("{}/{}/", SETTINGS_ROOT, escape_key(name));

        let removed = {
            let Ok(mut db) = self.db.lock() else {
                Error::SettingsUnavailable(prefix).log();
                return false;
            };
            let keys = db
                .get_all()
                .into_iter()
                .filter(|key| key.starts_with(&prefix))
                .collect::<Vec<_>>();
            for key in &keys {
                let _ = db.rem(key);
            }
            !keys.is_empty()
        };

        if removed {
            self.notify_deleted(name);
        }
        removed
    }

    fn notify_deleted(&self, name: &str) {
        for cb in &self.deletion_cbs {
            cb(name);
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("deletion_cbs", &self.deletion_cbs.len())
            .finish()
    }
}

// ===== global functions =====

fn key_path(iap: Option<&str>, key: &str) -> String {
    match iap {
        Some(name) => {
            format!("{}/{}/{}", SETTINGS_ROOT, escape_key(name), key)
        }
        // Global keys live next to the IAP subtree, not inside it.
        None => format!("{SETTINGS_BASE}/{key}"),
    }
}

/// Escapes a settings name for use as a tree key.
pub fn escape_key(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => {
                escaped.push(byte as char);
            }
            _ => {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    escaped
}

/// Reverses [`escape_key`]. Malformed escapes are kept verbatim.
pub fn unescape_key(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut name = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = escaped.get(i + 1..i + 3)
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            name.push(byte);
            i += 3;
            continue;
        }
        name.push(bytes[i]);
        i += 1;
    }
    match String::from_utf8(name) {
        Ok(name) => name,
        Err(err) => {
            warn!(%escaped, "invalid escape in settings key");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}
