//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::sync::Arc;

use common::{
    StubModule, TestBed, UpBehavior, full_module, statuses, wlan_identity,
};
use netconn_core::iap::IapState;
use netconn_core::request::{RequestAttrs, RequestStatus};
use netconn_core::tasks::messages::input::InputMsg;
use netconn_utils::network::{
    LayerFns, NetworkAttrs, NetworkIdentity, NwLayer, error_tags,
};

#[test]
fn test_concurrent_requests_coalesce() {
    // Keep the link layer in flight so all three requests arrive before
    // the attempt completes.
    let module = Arc::new(
        full_module("WLAN_INFRA").with_behavior(NwLayer::Link, UpBehavior::Hold),
    );
    let mut bed = TestBed::new(vec![module.clone()], true);

    let identity = wlan_identity("home");
    let (first_id, mut rx1) = bed.submit(identity.clone(), RequestAttrs::USER);
    bed.drive();
    let (_, mut rx2) = bed.submit(identity.clone(), RequestAttrs::USER);
    let (_, mut rx3) = bed.submit(identity.clone(), RequestAttrs::USER);
    bed.drive();

    // One IAP serves all three.
    assert_eq!(module.calls(), vec!["link_up"]);

    module.release_held();
    bed.drive();
    assert_eq!(bed.states().last(), Some(&IapState::Connected));

    for rx in [&mut rx1, &mut rx2, &mut rx3] {
        let updates = statuses(rx);
        assert_eq!(updates, vec![RequestStatus::Created]);
    }

    // The surviving request is the oldest one.
    assert_eq!(bed.master.requests.head_id(), Some(first_id));
}

#[test]
fn test_merge_into_connected_request() {
    let module = Arc::new(full_module("WLAN_INFRA"));
    let mut bed = TestBed::new(vec![module], true);

    let identity = wlan_identity("home");
    let (_, mut rx1) = bed.submit(identity.clone(), RequestAttrs::USER);
    bed.drive();
    assert_eq!(statuses(&mut rx1), vec![RequestStatus::Created]);

    // A later request for the connected network hears CREATED right away.
    let (_, mut rx2) = bed.submit(identity, RequestAttrs::USER);
    bed.drive();
    assert_eq!(statuses(&mut rx2), vec![RequestStatus::Created]);
}

#[test]
fn test_busy_while_tearing_down() {
    let module = Arc::new(full_module("WLAN_INFRA"));
    // Manual scripts keep the tear-down parked in CONNECTED_DOWN.
    let mut bed = TestBed::new(vec![module], false);

    let identity = wlan_identity("home");
    bed.submit(identity.clone(), RequestAttrs::USER);
    bed.drive();
    let pre_up = bed.scripts.launches();
    bed.deliver_script_exit(pre_up[0].pid, 0);
    let post_up = bed.scripts.launches();
    bed.deliver_script_exit(post_up.last().unwrap().pid, 0);
    assert_eq!(bed.states().last(), Some(&IapState::Connected));

    let iap_id = bed.iap_id(&identity).unwrap();
    bed.master.disconnect_iap(iap_id, None);
    bed.drive();
    assert_eq!(bed.states().last(), Some(&IapState::ConnectedDown));

    let (_, mut rx) = bed.submit(identity, RequestAttrs::USER);
    bed.drive();
    assert_eq!(statuses(&mut rx), vec![RequestStatus::Busy]);
}

#[test]
fn test_unknown_network_type_fails() {
    let mut bed = TestBed::new(vec![], true);

    let identity = NetworkIdentity::new(
        Some("BOGUS"),
        NetworkAttrs::empty(),
        Some("nowhere"),
    );
    let (_, mut rx) = bed.submit(identity, RequestAttrs::USER);
    bed.drive();

    assert_eq!(
        statuses(&mut rx),
        vec![RequestStatus::Failed(Some(
            error_tags::INVALID_IAP.to_owned()
        ))]
    );
    assert!(bed.master.requests.is_empty());
}

#[test]
fn test_any_request_walks_saved_iaps_by_priority() {
    // GPRS and WLAN modules; the WLAN attempt fails, GPRS succeeds.
    let wlan = Arc::new(full_module("WLAN_INFRA").with_behavior(
        NwLayer::Link,
        UpBehavior::Error(error_tags::NETWORK_ERROR.to_owned()),
    ));
    let gprs = Arc::new(StubModule::new("gprs", "GPRS", LayerFns::all()));
    let mut bed = TestBed::new(vec![wlan.clone(), gprs.clone()], true);

    bed.master
        .settings
        .set_string(Some("cellular"), "type", "GPRS");
    bed.master
        .settings
        .set_string(Some("home"), "type", "WLAN_INFRA");

    // No type, no id: try saved IAPs, best first.
    let identity = NetworkIdentity::default();
    let (_, mut rx) = bed.submit(identity, RequestAttrs::USER);
    bed.drive();

    // WLAN outranks GPRS, so it went first and failed over.
    assert_eq!(wlan.calls(), vec!["link_up"]);
    assert_eq!(
        gprs.calls(),
        vec!["link_up", "link_post_up", "ip_up", "srv_up"]
    );
    assert_eq!(statuses(&mut rx), vec![RequestStatus::Created]);
}

#[test]
fn test_shutdown_drains_requests() {
    let module = Arc::new(full_module("WLAN_INFRA"));
    let mut bed = TestBed::new(vec![module], true);

    let (_, mut rx1) = bed.submit(wlan_identity("home"), RequestAttrs::USER);
    let (_, mut rx2) = bed.submit(wlan_identity("work"), RequestAttrs::USER);
    bed.drive();

    bed.master.process_msg(InputMsg::Shutdown);
    bed.drive();

    assert!(bed.master.requests.is_empty());
    assert_eq!(statuses(&mut rx1).last(), Some(&RequestStatus::Disconnected));
    assert_eq!(statuses(&mut rx2).last(), Some(&RequestStatus::Disconnected));
}

#[test]
fn test_cancel_mid_link_up() {
    let module = Arc::new(
        full_module("WLAN_INFRA").with_behavior(NwLayer::Link, UpBehavior::Hold),
    );
    let mut bed = TestBed::new(vec![module.clone()], true);

    let (request_id, mut rx) =
        bed.submit(wlan_identity("home"), RequestAttrs::USER);
    bed.drive();

    netconn_core::request::cancel(
        &mut bed.master,
        request_id,
        RequestAttrs::CONN_UI,
    );
    bed.drive();

    // The held link_up callback arrives after the fact and is dropped.
    module.release_held();
    bed.drive();

    assert_eq!(statuses(&mut rx), vec![RequestStatus::Disconnected]);
    assert!(bed.master.requests.is_empty());
}
