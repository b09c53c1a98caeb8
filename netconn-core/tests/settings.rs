//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use common::{TestBed, full_module, test_db};
use netconn_core::scan::ScanEntry;
use netconn_core::settings::{Settings, escape_key, unescape_key};

#[test]
fn test_escape_round_trip() {
    for name in ["plain", "with space", "a/b%c", "[EasyWLAN-1]", "käse"] {
        let escaped = escape_key(name);
        assert!(
            escaped
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "%_-".contains(c)),
            "unexpected character in {escaped:?}"
        );
        assert_eq!(unescape_key(&escaped), name);
    }
}

#[test]
fn test_get_with_defaults() {
    let settings = Settings::new(test_db());

    assert!(!settings.get_bool(Some("nowhere"), "temporary", false));
    assert!(settings.get_bool(Some("nowhere"), "temporary", true));
    assert_eq!(settings.get_string(Some("nowhere"), "type"), None);
    assert_eq!(settings.get_string(None, "srv_provider/preferred_type"), None);
}

#[test]
fn test_is_temporary() {
    let settings = Settings::new(test_db());
    settings.set_bool(Some("flagged"), "temporary", true);
    settings.set_string(Some("normal"), "type", "GPRS");

    assert!(settings.is_temporary(Some("flagged")));
    assert!(settings.is_temporary(Some("[EasyWLAN]")));
    assert!(!settings.is_temporary(Some("normal")));
    assert!(!settings.is_temporary(None));
}

#[test]
fn test_remove_temporary_sweep() {
    let mut settings = Settings::new(test_db());
    settings.set_bool(Some("tmp one"), "temporary", true);
    settings.set_string(Some("tmp one"), "type", "WLAN_INFRA");
    settings.set_bool(Some("[Easy guest]"), "temporary", false);
    settings.set_string(Some("keeper"), "type", "GPRS");

    assert!(settings.remove_temporary(None));

    let mut names = settings.iap_names();
    names.sort();
    assert_eq!(names, vec!["keeper"]);

    // Nothing temporary left; the sweep reports so.
    assert!(!settings.remove_temporary(None));
}

#[test]
fn test_non_temporary_not_unset() {
    let mut settings = Settings::new(test_db());
    settings.set_string(Some("keeper"), "type", "GPRS");

    assert!(!settings.remove_temporary(Some("keeper")));
    assert_eq!(settings.get_string(Some("keeper"), "type").as_deref(), Some("GPRS"));
}

#[test]
fn test_rename_moves_subtree() {
    let mut settings = Settings::new(test_db());
    settings.set_string(Some("old name"), "type", "WLAN_INFRA");
    settings.set_bool(Some("old name"), "temporary", true);

    assert!(settings.rename("old name", "new name"));
    assert_eq!(
        settings.get_string(Some("new name"), "type").as_deref(),
        Some("WLAN_INFRA")
    );
    assert_eq!(settings.get_string(Some("old name"), "type"), None);

    // Renaming something that does not exist reports failure.
    assert!(!settings.rename("old name", "elsewhere"));
}

#[test]
fn test_deletion_notifies_scan_cache_once() {
    let module = Arc::new(full_module("WLAN_INFRA"));
    let mut bed = TestBed::new(vec![module], true);

    let deletions = Arc::new(AtomicUsize::new(0));
    let counter = deletions.clone();
    bed.master
        .settings
        .subscribe_deletions(Box::new(move |name| {
            assert_eq!(name, "home net");
            counter.fetch_add(1, Ordering::Relaxed);
        }));

    bed.master.settings.set_bool(Some("home net"), "temporary", true);
    bed.master.scan_cache.insert(
        "home net",
        ScanEntry::new(common::wlan_identity("home net"), Utc::now()),
    );
    bed.master.scan_cache.insert(
        "other",
        ScanEntry::new(common::wlan_identity("other"), Utc::now()),
    );

    // An external writer deletes the entry.
    assert!(bed.master.settings.remove_temporary(Some("home net")));
    bed.drive();

    assert_eq!(deletions.load(Ordering::Relaxed), 1);
    assert!(bed.master.scan_cache.get("home net").is_none());
    // Unrelated entries survive.
    assert!(bed.master.scan_cache.get("other").is_some());
    assert!(bed.master.requests.is_empty());
}
