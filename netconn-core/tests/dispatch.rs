//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::sync::Arc;

use common::{TestBed, full_module, statuses, wlan_identity};
use netconn_core::api::{ApiArg, ApiMessage, ApiReply};
use netconn_core::priority::{PreferredService, network_priority};
use netconn_core::request::RequestStatus;
use netconn_core::tasks::messages::input::InputMsg;
use netconn_utils::network::NetworkAttrs;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

fn api_msg(
    member: &str,
    signature: &str,
    args: Vec<ApiArg>,
) -> (ApiMessage, UnboundedReceiver<ApiReply>, UnboundedReceiver<netconn_core::request::RequestUpdateMsg>) {
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let msg = ApiMessage {
        interface: "com.nokia.icd".to_owned(),
        member: member.to_owned(),
        signature: signature.to_owned(),
        args,
        reply_tx: Some(reply_tx),
        notify: Some(notify_tx),
    };
    (msg, reply_rx, notify_rx)
}

#[test]
fn test_connect_method_round_trip() {
    let module = Arc::new(full_module("WLAN_INFRA"));
    let mut bed = TestBed::new(vec![module], true);
    bed.master
        .settings
        .set_string(Some("home"), "type", "WLAN_INFRA");

    let (msg, mut reply_rx, mut notify_rx) = api_msg(
        "connect",
        "su",
        vec![ApiArg::Str("home".to_owned()), ApiArg::U32(0)],
    );
    bed.master.process_msg(InputMsg::Api(msg));
    bed.drive();

    assert!(matches!(reply_rx.try_recv(), Ok(ApiReply::Ok(_))));
    assert_eq!(statuses(&mut notify_rx), vec![RequestStatus::Created]);

    // get_state reports the connected head request.
    let (msg, mut reply_rx, _) = api_msg("get_state", "", vec![]);
    bed.master.process_msg(InputMsg::Api(msg));
    match reply_rx.try_recv() {
        Ok(ApiReply::Ok(args)) => {
            assert_eq!(args[0].as_str().map(String::as_str), Some("CONNECTED"));
        }
        reply => panic!("unexpected get_state reply: {reply:?}"),
    }
}

#[test]
fn test_signature_mismatch_is_unsupported() {
    let mut bed = TestBed::new(vec![], true);

    // connect with a missing attribute word.
    let (msg, mut reply_rx, _) =
        api_msg("connect", "s", vec![ApiArg::Str("home".to_owned())]);
    bed.master.process_msg(InputMsg::Api(msg));

    match reply_rx.try_recv() {
        Ok(ApiReply::Error { name, .. }) => {
            assert_eq!(name, "org.freedesktop.DBus.Error.NotSupported");
        }
        reply => panic!("unexpected reply: {reply:?}"),
    }
    assert!(bed.master.requests.is_empty());
}

#[test]
fn test_unknown_member_is_unsupported() {
    let mut bed = TestBed::new(vec![], true);

    let (msg, mut reply_rx, _) = api_msg("frobnicate", "", vec![]);
    bed.master.process_msg(InputMsg::Api(msg));

    assert!(matches!(
        reply_rx.try_recv(),
        Ok(ApiReply::Error { .. })
    ));
}

#[test]
fn test_disconnect_method() {
    let module = Arc::new(full_module("WLAN_INFRA"));
    let mut bed = TestBed::new(vec![module], true);

    let (_, mut notify_rx) =
        bed.submit(wlan_identity("home"), netconn_core::request::RequestAttrs::USER);
    bed.drive();

    let (msg, mut reply_rx, _) = api_msg(
        "disconnect",
        "s",
        vec![ApiArg::Str("home".to_owned())],
    );
    bed.master.process_msg(InputMsg::Api(msg));
    bed.drive();

    assert!(matches!(reply_rx.try_recv(), Ok(ApiReply::Ok(_))));
    assert_eq!(
        statuses(&mut notify_rx),
        vec![RequestStatus::Created, RequestStatus::Disconnected]
    );

    // Disconnecting an unknown connection is an error reply.
    let (msg, mut reply_rx, _) = api_msg(
        "disconnect",
        "s",
        vec![ApiArg::Str("home".to_owned())],
    );
    bed.master.process_msg(InputMsg::Api(msg));
    assert!(matches!(reply_rx.try_recv(), Ok(ApiReply::Error { .. })));
}

#[test]
fn test_get_statistics_uptime() {
    let module = Arc::new(full_module("WLAN_INFRA"));
    let mut bed = TestBed::new(vec![module], true);

    bed.submit(wlan_identity("home"), netconn_core::request::RequestAttrs::USER);
    bed.drive();

    let (msg, mut reply_rx, _) = api_msg(
        "get_statistics",
        "s",
        vec![ApiArg::Str("home".to_owned())],
    );
    bed.master.process_msg(InputMsg::Api(msg));
    match reply_rx.try_recv() {
        Ok(ApiReply::Ok(args)) => {
            assert_eq!(args[0].as_str().map(String::as_str), Some("home"));
            assert!(args[1].as_u32().is_some());
        }
        reply => panic!("unexpected reply: {reply:?}"),
    }
}

#[test]
fn test_network_priority_table() {
    let no_pref = PreferredService::default();

    assert_eq!(
        network_priority(&no_pref, None, Some("WLAN_INFRA"), NetworkAttrs::empty()),
        60
    );
    assert_eq!(
        network_priority(&no_pref, None, Some("WIMAX"), NetworkAttrs::empty()),
        50
    );
    assert_eq!(
        network_priority(&no_pref, None, Some("GPRS"), NetworkAttrs::empty()),
        45
    );
    assert_eq!(
        network_priority(&no_pref, None, Some("DUN_GSM_PS"), NetworkAttrs::empty()),
        40
    );
    assert_eq!(
        network_priority(&no_pref, None, Some("DUN_CDMA_QNC"), NetworkAttrs::empty()),
        30
    );
    assert_eq!(
        network_priority(&no_pref, None, None, NetworkAttrs::empty()),
        0
    );

    // Saved IAPs get boosted.
    assert_eq!(
        network_priority(&no_pref, None, Some("GPRS"), NetworkAttrs::IAPNAME),
        145
    );

    // A matching preferred service overrides everything else.
    let pref = PreferredService {
        service_type: Some("ovi".to_owned()),
        service_id: Some("acct1".to_owned()),
    };
    assert_eq!(
        network_priority(
            &pref,
            Some(("ovi", "acct1")),
            Some("GPRS"),
            NetworkAttrs::IAPNAME
        ),
        645
    );
    assert_eq!(
        network_priority(
            &pref,
            Some(("ovi", "other")),
            Some("GPRS"),
            NetworkAttrs::IAPNAME
        ),
        145
    );
}
