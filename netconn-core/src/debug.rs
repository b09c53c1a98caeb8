//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use netconn_utils::network::{IapId, NetworkIdentity, NwLayer};
use netconn_utils::script::{ScriptPhase, ScriptPid};
use tracing::{debug, debug_span};

use crate::iap::{IapState, IapStatus};
use crate::request::RequestId;

// Connection daemon debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    IapCreate(IapId, &'a NetworkIdentity),
    IapStateChange(IapId, IapState, IapState),
    IapStatus(IapId, IapStatus),
    IapRestart(IapId, NwLayer),
    IapRestartResume(IapId, NwLayer),
    LayerCallbackStale(IapId, u64),
    ScriptLaunch(IapId, ScriptPhase, ScriptPid),
    ScriptExit(ScriptPid, i32),
    ScriptCancel(ScriptPid),
    ScriptWait(IapId),
    RequestSubmit(RequestId, &'a NetworkIdentity),
    RequestMerge(RequestId, RequestId),
    SaveDialog(IapId, u32),
    SettingsDeleted(&'a str),
    ScanCacheEvict(&'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::IapCreate(iap_id, identity) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!(%identity, "{}", self);
                });
            }
            Debug::IapStateChange(iap_id, old_state, new_state) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                });
            }
            Debug::IapStatus(iap_id, status) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!(?status, "{}", self);
                });
            }
            Debug::IapRestart(iap_id, layer)
            | Debug::IapRestartResume(iap_id, layer) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!(%layer, "{}", self);
                });
            }
            Debug::LayerCallbackStale(iap_id, seq) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!(%seq, "{}", self);
                });
            }
            Debug::ScriptLaunch(iap_id, phase, pid) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!(%phase, %pid, "{}", self);
                });
            }
            Debug::ScriptExit(pid, exit_value) => {
                debug!(%pid, %exit_value, "{}", self);
            }
            Debug::ScriptCancel(pid) => {
                debug!(%pid, "{}", self);
            }
            Debug::ScriptWait(iap_id) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::RequestSubmit(request_id, identity) => {
                debug_span!("request", id = %request_id).in_scope(|| {
                    debug!(%identity, "{}", self);
                });
            }
            Debug::RequestMerge(from, into) => {
                debug!(%from, %into, "{}", self);
            }
            Debug::SaveDialog(iap_id, token) => {
                debug_span!("iap", id = %iap_id).in_scope(|| {
                    debug!(%token, "{}", self);
                });
            }
            Debug::SettingsDeleted(name) => {
                debug!(%name, "{}", self);
            }
            Debug::ScanCacheEvict(name) => {
                debug!(%name, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::IapCreate(..) => {
                write!(f, "IAP created")
            }
            Debug::IapStateChange(..) => {
                write!(f, "state transition")
            }
            Debug::IapStatus(..) => {
                write!(f, "IAP status")
            }
            Debug::IapRestart(..) => {
                write!(f, "restarting from layer")
            }
            Debug::IapRestartResume(..) => {
                write!(f, "restart scripts done, resuming bring-up")
            }
            Debug::LayerCallbackStale(..) => {
                write!(f, "stale layer callback, dropped")
            }
            Debug::ScriptLaunch(..) => {
                write!(f, "script launched")
            }
            Debug::ScriptExit(..) => {
                write!(f, "script exited")
            }
            Debug::ScriptCancel(..) => {
                write!(f, "script cancellation requested")
            }
            Debug::ScriptWait(..) => {
                write!(f, "still more scripts to come, waiting")
            }
            Debug::RequestSubmit(..) => {
                write!(f, "request submitted")
            }
            Debug::RequestMerge(..) => {
                write!(f, "request merged")
            }
            Debug::SaveDialog(..) => {
                write!(f, "save dialog requested")
            }
            Debug::SettingsDeleted(..) => {
                write!(f, "IAP deletion detected, checking cache")
            }
            Debug::ScanCacheEvict(..) => {
                write!(f, "scan cache entry evicted")
            }
        }
    }
}
