//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use netconn_utils::network::NetworkIdentity;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::iap::{Iap, IapState};

// Useful type definition(s).
pub type StatusSender = UnboundedSender<StatusSignal>;

/// Status events broadcast to transport-level observers.
#[derive(Clone, Debug, Serialize)]
pub enum StatusSignal {
    /// IAP entered a new lifecycle state.
    State {
        identity: NetworkIdentity,
        state: IapState,
    },
    /// Service layer reported or cleared a restricted connection.
    LimitedConn {
        identity: NetworkIdentity,
        limited: bool,
    },
    /// Connection is up.
    Connected { identity: NetworkIdentity },
    /// Connection is gone; `err` carries the failure tag, if any.
    Disconnected {
        identity: NetworkIdentity,
        err: Option<String>,
    },
}

// ===== global functions =====

pub(crate) fn state_change(tx: &StatusSender, iap: &Iap) {
    let _ = tx.send(StatusSignal::State {
        identity: iap.connection.clone(),
        state: iap.state,
    });
}

pub(crate) fn limited_conn(tx: &StatusSender, iap: &Iap) {
    let _ = tx.send(StatusSignal::LimitedConn {
        identity: iap.connection.clone(),
        limited: iap.limited_conn,
    });
}

pub(crate) fn connected(tx: &StatusSender, iap: &Iap) {
    let _ = tx.send(StatusSignal::Connected {
        identity: iap.connection.clone(),
    });
}

pub(crate) fn disconnected(tx: &StatusSender, iap: &Iap) {
    let _ = tx.send(StatusSignal::Disconnected {
        identity: iap.connection.clone(),
        err: iap.err_str.clone(),
    });
}
