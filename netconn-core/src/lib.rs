//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod api;
pub mod debug;
pub mod error;
pub mod iap;
pub mod module;
pub mod policy;
pub mod priority;
pub mod request;
pub mod scan;
pub mod settings;
pub mod status;
pub mod tasks;
pub mod ui;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use derive_new::new;
use netconn_utils::network::{IapId, LayerReplyMsg, LayerReplySender, NwLayer};
use netconn_utils::script::{ScriptExitMsg, ScriptExitSender, ScriptRunner};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::debug::Debug;
use crate::module::ModuleRegistry;
use crate::priority::PreferredService;
use crate::request::RequestList;
use crate::scan::ScanCache;
use crate::settings::Settings;
use crate::status::StatusSender;
use crate::tasks::messages::input::InputMsg;
use crate::ui::UiRequestSender;

/// The process-scoped daemon context. All state transitions run on the
/// single task driving [`Master::run`]; external work (modules, scripts,
/// timers) reports back through the Rx channels.
pub struct Master {
    // Registered network modules; read-only after init.
    pub modules: ModuleRegistry,
    // The request list.
    pub requests: RequestList,
    // Script runner.
    pub scripts: Arc<dyn ScriptRunner>,
    // Persistent settings tree.
    pub settings: Settings,
    // Cached scan results.
    pub scan_cache: ScanCache,
    // Preferred service strings, process lifetime.
    pub preferred: PreferredService,
    // Per-network-type inactivity timeouts.
    pub idle_timeouts: HashMap<String, Duration>,
    // Tx channels.
    pub tx: MasterChannelsTx,
    // Save dialog token allocator.
    pub(crate) next_dlg_token: u32,
    // Drain mode: exit once the request list empties.
    pub(crate) shutting_down: bool,
}

/// Master Tx channels, cloneable into modules, timers and transports.
#[derive(Clone, Debug)]
pub struct MasterChannelsTx {
    pub input: UnboundedSender<InputMsg>,
    pub layer: LayerReplySender,
    pub script_exit: ScriptExitSender,
    pub status: StatusSender,
    pub ui: UiRequestSender,
}

/// Master Rx channels, consumed by [`Master::run`].
#[derive(Debug, new)]
pub struct MasterChannelsRx {
    pub input: UnboundedReceiver<InputMsg>,
    pub layer: UnboundedReceiver<LayerReplyMsg>,
    pub script_exit: UnboundedReceiver<ScriptExitMsg>,
}

// ===== impl Master =====

impl Master {
    pub fn new(
        modules: ModuleRegistry,
        scripts: Arc<dyn ScriptRunner>,
        mut settings: Settings,
        idle_timeouts: HashMap<String, Duration>,
        tx: MasterChannelsTx,
    ) -> Master {
        // Deleted settings entries invalidate cached scan results.
        let input_tx = tx.input.clone();
        settings.subscribe_deletions(Box::new(move |name| {
            let _ = input_tx.send(InputMsg::SettingsDeleted(name.to_owned()));
        }));

        let preferred = PreferredService::init(&settings);

        Master {
            modules,
            requests: Default::default(),
            scripts,
            settings,
            scan_cache: Default::default(),
            preferred,
            idle_timeouts,
            tx,
            next_dlg_token: 1,
            shutting_down: false,
        }
    }

    /// Runs the main event loop until shut down and drained.
    pub async fn run(mut self, mut rx: MasterChannelsRx) {
        loop {
            let msg = tokio::select! {
                msg = rx.input.recv() => {
                    match msg {
                        Some(msg) => msg,
                        None => break,
                    }
                }
                Some(msg) = rx.layer.recv() => InputMsg::Layer(msg),
                Some(msg) = rx.script_exit.recv() => InputMsg::ScriptExit(msg),
            };

            self.process_msg(msg);

            if self.shutting_down && self.requests.is_empty() {
                break;
            }
        }
    }

    /// Processes one input event. Every state transition in the daemon
    /// happens below this call.
    pub fn process_msg(&mut self, msg: InputMsg) {
        match msg {
            InputMsg::Api(msg) => {
                api::process_msg(self, msg);
            }
            InputMsg::Ui(signal) => {
                ui::process_signal(self, signal);
            }
            InputMsg::Layer(msg) => {
                iap::process_layer_cb(self, msg);
            }
            InputMsg::ScriptExit(msg) => {
                iap::process_script_exit(self, msg);
            }
            InputMsg::IdleTimeout(iap_id) => {
                iap::process_idle_timeout(self, iap_id);
            }
            InputMsg::SaveTimeout(iap_id) => {
                iap::process_save_timeout(self, iap_id);
            }
            InputMsg::SettingsDeleted(name) => {
                Debug::SettingsDeleted(&name).log();
                self.scan_cache.remove_iap(&name);
            }
            InputMsg::Shutdown => {
                request::shutdown(self);
            }
        }
    }

    /// Submits a disconnect for the IAP, e.g. on behalf of the idle
    /// timer. A `None` error means a normal disconnect.
    pub fn disconnect_iap(&mut self, iap_id: IapId, err_str: Option<String>) {
        iap::disconnect(self, iap_id, err_str);
    }

    /// Restarts the IAP from the given layer: tears down through it,
    /// runs the restart scripts, and brings the stack back up.
    pub fn restart_iap(&mut self, iap_id: IapId, layer: NwLayer) {
        iap::restart(self, iap_id, layer);
    }
}

// ===== global functions =====

/// Creates the master channel pair.
pub fn channels(
    status: StatusSender,
    ui: UiRequestSender,
) -> (MasterChannelsTx, MasterChannelsRx) {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (layer_tx, layer_rx) = mpsc::unbounded_channel();
    let (script_tx, script_rx) = mpsc::unbounded_channel();

    let tx = MasterChannelsTx {
        input: input_tx,
        layer: layer_tx,
        script_exit: script_tx,
        status,
        ui,
    };
    let rx = MasterChannelsRx::new(input_rx, layer_rx, script_rx);

    (tx, rx)
}
