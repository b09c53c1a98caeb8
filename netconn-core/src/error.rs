//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use netconn_utils::network::IapId;
use tracing::{error, warn};

use crate::iap::IapState;
use crate::request::RequestId;

// Connection daemon errors.
#[derive(Debug)]
pub enum Error {
    // Inter-task communication
    IapNotFound(IapId),
    RequestNotFound(RequestId),
    // Callback gating
    UnexpectedLayerCallback(IapId, IapState),
    UnexpectedScriptExit(IapId, IapState),
    // Module registry
    UnknownNetworkType(String),
    // Settings store
    SettingsUnavailable(String),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IapNotFound(iap_id) => {
                warn!(%iap_id, "{}", self);
            }
            Error::RequestNotFound(request_id) => {
                warn!(%request_id, "{}", self);
            }
            Error::UnexpectedLayerCallback(iap_id, state) => {
                error!(%iap_id, ?state, "{}", self);
            }
            Error::UnexpectedScriptExit(iap_id, state) => {
                error!(%iap_id, ?state, "{}", self);
            }
            Error::UnknownNetworkType(network_type) => {
                warn!(%network_type, "{}", self);
            }
            Error::SettingsUnavailable(key) => {
                warn!(%key, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IapNotFound(..) => {
                write!(f, "IAP not found")
            }
            Error::RequestNotFound(..) => {
                write!(f, "request not found")
            }
            Error::UnexpectedLayerCallback(..) => {
                write!(f, "layer callback in unexpected state, dropped")
            }
            Error::UnexpectedScriptExit(..) => {
                write!(f, "script exit in unexpected state, dropped")
            }
            Error::UnknownNetworkType(..) => {
                write!(f, "no modules registered for network type")
            }
            Error::SettingsUnavailable(..) => {
                write!(f, "settings store unavailable")
            }
        }
    }
}

impl std::error::Error for Error {}
