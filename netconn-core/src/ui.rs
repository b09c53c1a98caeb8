//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use netconn_utils::network::{NetworkAttrs, NetworkIdentity};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::Master;
use crate::request::{self, RequestAttrs};
use crate::settings::KEY_TYPE;
use crate::iap;

// The UI companion's signal interface.
pub const UI_INTERFACE: &str = "com.nokia.icd_ui";
pub const UI_DISCONNECT_SIG: &str = "disconnect";
pub const UI_RETRY_SIG: &str = "retry";
pub const UI_SAVE_SIG: &str = "save";

// Useful type definition(s).
pub type UiRequestSender = UnboundedSender<UiRequest>;

/// Signals received from the UI companion.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum UiSignal {
    /// The disconnect dialog was answered.
    Disconnect { pressed: bool },
    /// The retry dialog was answered.
    Retry {
        iap: String,
        retry: bool,
        flight_mode: Option<bool>,
    },
    /// The save dialog was answered with a new name.
    Save { iap: String, name: String },
}

/// Dialog requests sent to the UI companion.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum UiRequest {
    /// Ask whether a temporary IAP should be saved under a new name.
    SaveDialog { token: u32, iap: String },
    /// Withdraw an unanswered save dialog.
    SaveCancel { token: u32 },
}

// ===== global functions =====

// Reacts to an inbound UI signal.
pub(crate) fn process_signal(master: &mut Master, signal: UiSignal) {
    match signal {
        UiSignal::Disconnect { pressed } => {
            process_disconnect(master, pressed);
        }
        UiSignal::Retry {
            iap,
            retry,
            flight_mode,
        } => {
            process_retry(master, &iap, retry, flight_mode);
        }
        UiSignal::Save { iap, name } => {
            process_save(master, &iap, &name);
        }
    }
}

// Cancels the pending-call token of an unanswered save dialog when IAP
// teardown races it.
pub(crate) fn send_save_cancel(tx: &UiRequestSender, dlg: Option<u32>) {
    if let Some(token) = dlg {
        let _ = tx.send(UiRequest::SaveCancel { token });
    }
}

fn process_disconnect(master: &mut Master, pressed: bool) {
    if !pressed {
        info!("cancel selected in disconnect dialog");
        return;
    }

    match master.requests.head_id() {
        Some(request_id) => {
            info!(request = %request_id,
                "disconnect selected, disconnecting request");
            request::cancel(master, request_id, RequestAttrs::CONN_UI);
        }
        None => {
            warn!("disconnect selected, but no requests");
        }
    }
}

fn process_save(master: &mut Master, iap_name: &str, name: &str) {
    let network_type = master.settings.get_string(Some(iap_name), KEY_TYPE);
    let identity = NetworkIdentity::new(
        network_type,
        NetworkAttrs::IAPNAME,
        Some(iap_name),
    );

    match master.requests.find_iap(&identity).map(|(_, iap)| iap.id) {
        Some(iap_id) => {
            if iap::rename(master, iap_id, name) {
                debug!(%iap_name, %name, "saved IAP under new name");
            } else {
                warn!(%iap_name, "IAP was not renamed");
            }
        }
        None => {
            warn!(%iap_name, "IAP not found when save signal received");
        }
    }
}

// Retry verdicts are routed to the request scheduler: a declined retry
// cancels the request, an accepted one lets the running attempt chain
// continue.
fn process_retry(
    master: &mut Master,
    iap_name: &str,
    retry: bool,
    flight_mode: Option<bool>,
) {
    info!(%iap_name, %retry, ?flight_mode, "retry dialog answered");

    let Some(request_id) = master.requests.find_by_name(iap_name) else {
        warn!(%iap_name, "retry for unknown IAP");
        return;
    };
    if !retry {
        request::cancel(master, request_id, RequestAttrs::CONN_UI);
    }
}
