//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use netconn_utils::network::{
    IapId, LayerReply, LayerReplyMsg, LayerStatus, LayerUp, NetworkAttrs,
    NetworkIdentity, NetworkModule, NwLayer,
};
use netconn_utils::script::{ScriptEnv, ScriptExitMsg, ScriptPhase, ScriptPid};
use netconn_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Master;
use crate::debug::Debug;
use crate::error::Error;
use crate::module::ModuleChain;
use crate::request::{self, RequestId};
use crate::ui::{self, UiRequest};
use crate::{status, tasks};

// How long an unanswered save dialog holds back the CONNECTED state.
const SAVE_DIALOG_TIMEOUT: Duration = Duration::from_secs(30);

// IAP lifecycle states. Declaration order follows the bring-up and
// tear-down walks; restart acceptance relies on it.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum IapState {
    Disconnected,
    ScriptPreUp,
    LinkUp,
    LinkPostUp,
    IpUp,
    SrvUp,
    ScriptPostUp,
    Saving,
    Connected,
    ConnectedDown,
    SrvDown,
    IpDown,
    IpRestartScripts,
    LinkPreDown,
    LinkPreRestartScripts,
    LinkDown,
    LinkRestartScripts,
    ScriptPostDown,
}

// Completion status reported to the owning request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IapStatus {
    Created,
    Disconnected,
    Busy,
    Failed,
}

/// One in-memory connection attempt.
pub struct Iap {
    pub id: IapId,
    // Network identity; refined by modules as bring-up progresses.
    pub connection: NetworkIdentity,
    pub state: IapState,
    // Module chain driven by this attempt.
    pub(crate) chain: ModuleChain,
    // Cursor into the chain during bring-up or tear-down.
    pub current_module: Option<usize>,
    // Successful `_up` layers per module, in bring-up order. The
    // tear-down walk pops them in reverse.
    pub(crate) up_layers: Vec<Vec<NwLayer>>,
    // Sequence numbers correlating layer callbacks with the invocation
    // they belong to.
    pub(crate) layer_seq: u64,
    pub(crate) pending_seq: u64,
    // Set by the link layer, consumed by the layers above it.
    pub interface_name: Option<String>,
    // Most recent error tag; `None` means a normal disconnect.
    pub err_str: Option<String>,
    // Pending restart bookkeeping.
    pub restart_layer: Option<NwLayer>,
    pub restart_state: Option<IapState>,
    // Service layer reported a restricted connection.
    pub limited_conn: bool,
    // Outstanding script process ids.
    pub script_pids: HashSet<ScriptPid>,
    // Environment bags contributed by each layer, newest first.
    pub script_env: Vec<(NwLayer, ScriptEnv)>,
    // Settings name, and whether it is a transient local-only identity.
    pub settings_id: Option<String>,
    pub id_is_local: bool,
    // SAVING state gating.
    pub save_on_connect: bool,
    pub save_dlg: Option<u32>,
    pub(crate) save_timer: Option<TimeoutTask>,
    // Inactivity timer, armed while connected.
    pub(crate) idle_timer: Option<TimeoutTask>,
    pub stats: IapStats,
}

#[derive(Debug)]
pub struct IapStats {
    pub created: DateTime<Utc>,
    pub time_connected: Option<DateTime<Utc>>,
}

// What the state-indexed disconnect dispatch decided to do once the
// per-state bookkeeping is done.
enum DisconnectAction {
    Noop,
    Walk,
    DownCurrent(NwLayer),
    PreDownScripts,
}

// ===== impl Iap =====

impl Iap {
    pub(crate) fn new(
        id: IapId,
        connection: NetworkIdentity,
        chain: ModuleChain,
        save_on_connect: bool,
    ) -> Iap {
        Debug::IapCreate(id, &connection).log();

        let id_is_local = !connection.attrs.contains(NetworkAttrs::IAPNAME);
        let settings_id = connection.id.clone();
        let up_layers = vec![Vec::new(); chain.len()];

        Iap {
            id,
            connection,
            state: IapState::Disconnected,
            chain,
            current_module: None,
            up_layers,
            layer_seq: 0,
            pending_seq: 0,
            interface_name: None,
            err_str: None,
            restart_layer: None,
            restart_state: None,
            limited_conn: false,
            script_pids: HashSet::new(),
            script_env: Vec::new(),
            settings_id,
            id_is_local,
            save_on_connect,
            save_dlg: None,
            save_timer: None,
            idle_timer: None,
            stats: IapStats {
                created: Utc::now(),
                time_connected: None,
            },
        }
    }

    pub(crate) fn set_state(
        &mut self,
        new_state: IapState,
        tx: &status::StatusSender,
    ) {
        let old_state = self.state;
        self.state = new_state;
        Debug::IapStateChange(self.id, old_state, new_state).log();
        status::state_change(tx, self);
    }

    fn in_restart_scripts(&self) -> bool {
        matches!(
            self.state,
            IapState::IpRestartScripts
                | IapState::LinkPreRestartScripts
                | IapState::LinkRestartScripts
        )
    }
}

impl std::fmt::Debug for Iap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iap")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("state", &self.state)
            .field("current_module", &self.current_module)
            .field("interface_name", &self.interface_name)
            .field("err_str", &self.err_str)
            .finish()
    }
}

// ===== impl IapState =====

impl std::fmt::Display for IapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IapState::Disconnected => "DISCONNECTED",
            IapState::ScriptPreUp => "SCRIPT_PRE_UP",
            IapState::LinkUp => "LINK_UP",
            IapState::LinkPostUp => "LINK_POST_UP",
            IapState::IpUp => "IP_UP",
            IapState::SrvUp => "SRV_UP",
            IapState::ScriptPostUp => "SCRIPT_POST_UP",
            IapState::Saving => "SAVING",
            IapState::Connected => "CONNECTED",
            IapState::ConnectedDown => "CONNECTED_DOWN",
            IapState::SrvDown => "SRV_DOWN",
            IapState::IpDown => "IP_DOWN",
            IapState::IpRestartScripts => "IP_RESTART_SCRIPTS",
            IapState::LinkPreDown => "LINK_PRE_DOWN",
            IapState::LinkPreRestartScripts => "LINK_PRE_RESTART_SCRIPTS",
            IapState::LinkDown => "LINK_DOWN",
            IapState::LinkRestartScripts => "LINK_RESTART_SCRIPTS",
            IapState::ScriptPostDown => "SCRIPT_POST_DOWN",
        };
        write!(f, "{name}")
    }
}

// ===== bring-up =====

// Starts bringing up the head IAP of the request.
pub(crate) fn connect(master: &mut Master, request_id: RequestId) {
    let Some(request) = master.requests.get_mut(request_id) else {
        Error::RequestNotFound(request_id).log();
        return;
    };
    let Some(iap) = request.try_iaps.front_mut() else {
        Error::RequestNotFound(request_id).log();
        return;
    };
    if iap.state != IapState::Disconnected {
        warn!(iap = %iap.id, state = %iap.state, "connect on active IAP");
        return;
    }

    let iap_id = iap.id;
    if !iap.chain.is_empty() {
        iap.current_module = Some(0);
    }
    iap.set_state(IapState::ScriptPreUp, &master.tx.status);
    spawn_phase_scripts(master, iap_id, ScriptPhase::PreUp, vec![None], false);
}

// Advances the bring-up walk to the next implemented layer function, or
// into the post-up script phase when every layer is up.
pub(crate) fn next_up_step(master: &mut Master, iap_id: IapId) {
    let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
        Error::IapNotFound(iap_id).log();
        return;
    };

    let mut next = None;
    'modules: for (idx, module) in iap.chain.iter().enumerate() {
        for layer in NwLayer::UP_ORDER {
            if module.provides().contains(layer.up_fn())
                && !iap.up_layers[idx].contains(&layer)
            {
                next = Some((idx, layer, module.clone()));
                break 'modules;
            }
        }
    }

    match next {
        Some((idx, layer, module)) => {
            iap.current_module = Some(idx);
            iap.layer_seq += 1;
            iap.pending_seq = iap.layer_seq;
            let seq = iap.layer_seq;
            iap.set_state(up_state(layer), &master.tx.status);
            let identity = iap.connection.clone();
            let ifname = iap.interface_name.clone();
            let reply = LayerReply::new(iap_id, seq, master.tx.layer.clone());
            invoke_layer_up(&module, layer, &identity, ifname.as_deref(), reply);
        }
        None => {
            // Every layer is up.
            iap.set_state(IapState::ScriptPostUp, &master.tx.status);
            let envs = script_envs(iap);
            spawn_phase_scripts(master, iap_id, ScriptPhase::PostUp, envs, false);
        }
    }
}

// Processes a module layer completion callback, gating on the IAP state
// and the invocation sequence number.
pub(crate) fn process_layer_cb(master: &mut Master, msg: LayerReplyMsg) {
    let iap_id = msg.token.iap;
    let Some((request_id, iap)) = master.requests.iap_mut(iap_id) else {
        Error::IapNotFound(iap_id).log();
        return;
    };
    if msg.token.seq != iap.pending_seq {
        Debug::LayerCallbackStale(iap_id, msg.token.seq).log();
        return;
    }

    match iap.state {
        IapState::LinkUp
        | IapState::LinkPostUp
        | IapState::IpUp
        | IapState::SrvUp => {
            iap.pending_seq = 0;
            process_up_result(master, request_id, iap_id, msg.status);
        }
        IapState::SrvDown
        | IapState::IpDown
        | IapState::LinkPreDown
        | IapState::LinkDown => {
            iap.pending_seq = 0;
            disconnect_module(master, iap_id);
        }
        state => {
            Error::UnexpectedLayerCallback(iap_id, state).log();
        }
    }
}

fn process_up_result(
    master: &mut Master,
    request_id: RequestId,
    iap_id: IapId,
    layer_status: LayerStatus,
) {
    match layer_status {
        LayerStatus::Ok(up) => {
            apply_layer_up(master, request_id, iap_id, up, false);
        }
        LayerStatus::OkNewIap(up) => {
            apply_layer_up(master, request_id, iap_id, up, true);
        }
        LayerStatus::Error(err) => {
            let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
                return;
            };
            warn!(iap = %iap_id, state = %iap.state, %err, "layer function failed");
            iap.err_str = Some(err);
            disconnect_module(master, iap_id);
        }
        LayerStatus::Restart(layer) => {
            restart(master, iap_id, layer);
        }
    }
}

fn apply_layer_up(
    master: &mut Master,
    request_id: RequestId,
    iap_id: IapId,
    up: LayerUp,
    recheck_identity: bool,
) {
    // Merge the identity refinement, re-checking for collisions with
    // other attempts when the module asked for it.
    if let Some(refined) = &up.identity {
        let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
            return;
        };
        let mut new_identity = iap.connection.clone();
        new_identity.merge(refined);

        if recheck_identity {
            let collision = master
                .requests
                .iter()
                .filter(|request| request.id != request_id)
                .find(|request| {
                    request.try_iaps.front().is_some_and(|other| {
                        other.state != IapState::Disconnected
                            && other.connection.matches(&new_identity)
                    })
                })
                .map(|request| request.id);

            if let Some(other_id) = collision {
                if other_id < request_id {
                    // The older attempt wins; fold this request into it.
                    request::merge_into(master, request_id, other_id);
                    return;
                }
                // This attempt is older; the newer request folds in.
                request::merge_into(master, other_id, request_id);
            }
        }

        if let Some((_, iap)) = master.requests.iap_mut(iap_id) {
            iap.connection = new_identity;
        }
    }

    let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
        return;
    };
    let Some(layer) = layer_of_up_state(iap.state) else {
        Error::UnexpectedLayerCallback(iap_id, iap.state).log();
        return;
    };

    if let Some(ifname) = up.interface_name {
        iap.interface_name = Some(ifname);
    }
    if up.limited && layer == NwLayer::Service {
        iap.limited_conn = true;
        status::limited_conn(&master.tx.status, iap);
    }
    if let Some(env) = up.env {
        iap.script_env.insert(0, (layer, env));
    }
    if let Some(idx) = iap.current_module {
        iap.up_layers[idx].push(layer);
    }

    next_up_step(master, iap_id);
}

// ===== tear-down =====

/// Starts disconnecting the IAP. `err_str` is `None` when the network is
/// being disconnected normally.
///
/// An in-flight layer function is not aborted; advancing the state to the
/// matching `_DOWN` state makes its eventual callback recognizably stale.
pub(crate) fn disconnect(
    master: &mut Master,
    iap_id: IapId,
    err_str: Option<String>,
) {
    let action = {
        let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
            Error::IapNotFound(iap_id).log();
            return;
        };
        info!(iap = %iap_id, state = %iap.state,
            err = err_str.as_deref().unwrap_or("no error"),
            "disconnect requested");

        // The inactivity timer is only valid while connected.
        iap.idle_timer = None;

        match iap.state {
            IapState::Disconnected => {
                warn!(iap = %iap_id, "disconnect requested for already disconnected IAP");
                DisconnectAction::Noop
            }
            IapState::ScriptPreUp => {
                iap.err_str = err_str;
                DisconnectAction::Walk
            }
            IapState::LinkUp | IapState::LinkPostUp | IapState::IpUp => {
                iap.err_str = err_str;
                let layer = layer_of_up_state(iap.state)
                    .unwrap_or(NwLayer::Link);
                DisconnectAction::DownCurrent(layer)
            }
            IapState::SrvUp => {
                iap.err_str = err_str;
                if iap.limited_conn {
                    iap.limited_conn = false;
                    status::limited_conn(&master.tx.status, iap);
                }
                DisconnectAction::DownCurrent(NwLayer::Service)
            }
            IapState::Saving
            | IapState::ScriptPostUp
            | IapState::Connected => {
                if iap.state == IapState::Saving {
                    // Cancel the unanswered save dialog, then tear down
                    // like any connected IAP.
                    iap.save_timer = None;
                    ui::send_save_cancel(&master.tx.ui, iap.save_dlg.take());
                }
                iap.err_str = err_str;
                iap.set_state(IapState::ConnectedDown, &master.tx.status);
                DisconnectAction::PreDownScripts
            }
            _ => {
                info!(iap = %iap_id, "disconnect requested for already disconnecting IAP");
                DisconnectAction::Noop
            }
        }
    };

    match action {
        DisconnectAction::Noop => {}
        DisconnectAction::Walk => {
            cancel_scripts(master, iap_id);
            disconnect_module(master, iap_id);
        }
        DisconnectAction::DownCurrent(layer) => {
            down_current_module(master, iap_id, layer);
        }
        DisconnectAction::PreDownScripts => {
            cancel_scripts(master, iap_id);
            let remove_proxies = !master.requests.any_other_connected(iap_id);
            let envs = match master.requests.iap_mut(iap_id) {
                Some((_, iap)) => script_envs(iap),
                None => return,
            };
            spawn_phase_scripts(
                master,
                iap_id,
                ScriptPhase::PreDown,
                envs,
                remove_proxies,
            );
        }
    }
}

// Brings down the layer currently being brought up, when the module
// implements the matching down function; skips ahead otherwise.
fn down_current_module(master: &mut Master, iap_id: IapId, layer: NwLayer) {
    let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
        return;
    };

    let module = iap
        .current_module
        .and_then(|idx| iap.chain.get(idx))
        .cloned()
        .filter(|module| module.provides().contains(layer.down_fn()));

    match module {
        Some(module) => {
            info!(module = %module.name(), %layer,
                "calling down function in last tried module when disconnecting");
            iap.layer_seq += 1;
            iap.pending_seq = iap.layer_seq;
            let seq = iap.layer_seq;
            iap.set_state(down_state(layer), &master.tx.status);
            let identity = iap.connection.clone();
            let ifname = iap.interface_name.clone();
            let reply = LayerReply::new(iap_id, seq, master.tx.layer.clone());
            invoke_layer_down(&module, layer, &identity, ifname.as_deref(), reply);
        }
        None => {
            info!(%layer, "no down function in last tried module when disconnecting");
            disconnect_module(master, iap_id);
        }
    }
}

// Advances the tear-down walk: reverse layer order within the current
// module, then the previous module in the chain, until every layer that
// came up has been brought down.
pub(crate) fn disconnect_module(master: &mut Master, iap_id: IapId) {
    loop {
        let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
            Error::IapNotFound(iap_id).log();
            return;
        };

        let candidate = iap
            .up_layers
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, layers)| layers.last().map(|layer| (idx, *layer)));

        // Restart pivot: once the walk has gone through the restart
        // layer, stop descending and run the restart scripts instead.
        if let Some(restart_layer) = iap.restart_layer
            && candidate.is_none_or(|(_, layer)| layer < restart_layer)
        {
            restart_scripts(master, iap_id);
            return;
        }

        match candidate {
            None => {
                iap.set_state(IapState::ScriptPostDown, &master.tx.status);
                let envs = script_envs(iap);
                spawn_phase_scripts(
                    master,
                    iap_id,
                    ScriptPhase::PostDown,
                    envs,
                    false,
                );
                return;
            }
            Some((idx, layer)) => {
                iap.up_layers[idx].pop();
                iap.current_module = Some(idx);
                let module = iap.chain[idx].clone();

                if !module.provides().contains(layer.down_fn()) {
                    info!(module = %module.name(), %layer,
                        "no down function, skipping layer");
                    continue;
                }

                iap.layer_seq += 1;
                iap.pending_seq = iap.layer_seq;
                let seq = iap.layer_seq;
                iap.set_state(down_state(layer), &master.tx.status);
                let identity = iap.connection.clone();
                let ifname = iap.interface_name.clone();
                let reply =
                    LayerReply::new(iap_id, seq, master.tx.layer.clone());
                invoke_layer_down(
                    &module,
                    layer,
                    &identity,
                    ifname.as_deref(),
                    reply,
                );
                return;
            }
        }
    }
}

// The tear-down walk reached the restart layer; run the restart scripts
// for the env bags the torn-down layers contributed, then resume
// bring-up.
fn restart_scripts(master: &mut Master, iap_id: IapId) {
    let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
        return;
    };
    let Some(restart_layer) = iap.restart_layer else {
        finish_disconnected(master, iap_id);
        return;
    };

    let (torn, kept): (Vec<_>, Vec<_>) = iap
        .script_env
        .drain(..)
        .partition(|(layer, _)| *layer >= restart_layer);
    iap.script_env = kept;

    match restart_script_state(restart_layer) {
        Some(state) if !torn.is_empty() => {
            iap.set_state(state, &master.tx.status);
            let envs = torn.into_iter().map(|(_, env)| Some(env)).collect();
            spawn_phase_scripts(
                master,
                iap_id,
                ScriptPhase::PostDown,
                envs,
                false,
            );
        }
        _ => {
            resume_restart(master, iap_id);
        }
    }
}

// Restart scripts are done; re-enter the bring-up walk at the restart
// layer with the same module cursor.
fn resume_restart(master: &mut Master, iap_id: IapId) {
    let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
        return;
    };
    let layer = iap.restart_layer.take().unwrap_or(NwLayer::None);
    iap.restart_state = None;
    Debug::IapRestartResume(iap_id, layer).log();
    next_up_step(master, iap_id);
}

// Every layer and script phase is done; the IAP is disconnected.
fn finish_disconnected(master: &mut Master, iap_id: IapId) {
    let (request_id, settings_id, iap_status) = {
        let Some((request_id, iap)) = master.requests.iap_mut(iap_id) else {
            Error::IapNotFound(iap_id).log();
            return;
        };
        iap.set_state(IapState::Disconnected, &master.tx.status);
        iap.current_module = None;
        for layers in &mut iap.up_layers {
            layers.clear();
        }
        iap.script_env.clear();
        iap.pending_seq = 0;
        status::disconnected(&master.tx.status, iap);

        let settings_id =
            (!iap.id_is_local).then(|| iap.settings_id.clone()).flatten();
        let iap_status = match iap.err_str {
            Some(_) => IapStatus::Failed,
            None => IapStatus::Disconnected,
        };
        (request_id, settings_id, iap_status)
    };

    // Temporary settings are not kept around once the attempt is gone.
    if let Some(id) = settings_id
        && master.settings.is_temporary(Some(&id))
    {
        master.settings.remove_temporary(Some(&id));
    }

    Debug::IapStatus(iap_id, iap_status).log();
    request::process_iap_status(master, request_id, iap_status);
}

// ===== restart =====

/// Restarts the IAP by disconnecting down through `layer` and bringing it
/// back up from there.
pub(crate) fn restart(master: &mut Master, iap_id: IapId, layer: NwLayer) {
    let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
        Error::IapNotFound(iap_id).log();
        return;
    };

    if iap.state > IapState::Connected && !iap.in_restart_scripts() {
        info!(iap = %iap_id, "ignored restart since already disconnecting");
        return;
    }

    Debug::IapRestart(iap_id, layer).log();
    iap.restart_layer = Some(layer);
    iap.restart_state = Some(iap.state);
    disconnect(master, iap_id, None);
}

// ===== scripts =====

// Removes the exited script from the outstanding set and advances the
// current phase once the set drains to empty. Exit order is irrelevant;
// timeouts and failures advance the phase all the same.
pub(crate) fn process_script_exit(master: &mut Master, msg: ScriptExitMsg) {
    Debug::ScriptExit(msg.pid, msg.exit_value).log();

    let (iap_id, state) = {
        let Some((_, iap)) = master.requests.iap_mut_by_script(msg.pid) else {
            // Cancelled scripts still report their exit; nothing to do.
            tracing::debug!(pid = %msg.pid, "exit from untracked script");
            return;
        };
        iap.script_pids.remove(&msg.pid);
        if msg.exit_value != 0 {
            warn!(iap = %iap.id, pid = %msg.pid, exit_value = %msg.exit_value,
                "script failed");
        }
        if !iap.script_pids.is_empty() {
            Debug::ScriptWait(iap.id).log();
            return;
        }
        (iap.id, iap.state)
    };

    match state {
        IapState::ScriptPreUp => {
            next_up_step(master, iap_id);
        }
        IapState::ScriptPostUp => {
            let save = master
                .requests
                .iap_mut(iap_id)
                .is_some_and(|(_, iap)| iap.save_on_connect);
            if save {
                enter_saving(master, iap_id);
            } else {
                has_connected(master, iap_id);
            }
        }
        IapState::ConnectedDown => {
            disconnect_module(master, iap_id);
        }
        IapState::ScriptPostDown => {
            finish_disconnected(master, iap_id);
        }
        IapState::IpRestartScripts
        | IapState::LinkPreRestartScripts
        | IapState::LinkRestartScripts => {
            resume_restart(master, iap_id);
        }
        state => {
            Error::UnexpectedScriptExit(iap_id, state).log();
        }
    }
}

// Requests cancellation of every outstanding script. Their exits will
// still arrive and are dropped as untracked.
fn cancel_scripts(master: &mut Master, iap_id: IapId) {
    let pids = match master.requests.iap_mut(iap_id) {
        Some((_, iap)) => iap.script_pids.drain().collect::<Vec<_>>(),
        None => return,
    };
    for pid in pids {
        Debug::ScriptCancel(pid).log();
        master.scripts.cancel(pid);
    }
}

// Spawns one script per env bag for the given phase and records the pids.
fn spawn_phase_scripts(
    master: &mut Master,
    iap_id: IapId,
    phase: ScriptPhase,
    envs: Vec<Option<ScriptEnv>>,
    remove_proxies: bool,
) {
    let (ifname, id, network_type) = {
        let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
            return;
        };
        (
            iap.interface_name.clone(),
            (!iap.id_is_local).then(|| iap.settings_id.clone()).flatten(),
            iap.connection.network_type.clone(),
        )
    };

    let scripts = master.scripts.clone();
    let exit_tx = master.tx.script_exit.clone();
    let mut pids = Vec::with_capacity(envs.len());
    for env in &envs {
        let args = netconn_utils::script::ScriptArgs {
            interface_name: ifname.as_deref(),
            id: id.as_deref(),
            network_type: network_type.as_deref(),
            env: env.as_ref(),
        };
        let pid = match phase {
            ScriptPhase::PreUp => scripts.pre_up(args, &exit_tx),
            ScriptPhase::PostUp => scripts.post_up(args, &exit_tx),
            ScriptPhase::PreDown => {
                scripts.pre_down(args, remove_proxies, &exit_tx)
            }
            ScriptPhase::PostDown => scripts.post_down(args, &exit_tx),
        };
        Debug::ScriptLaunch(iap_id, phase, pid).log();
        pids.push(pid);
    }

    if let Some((_, iap)) = master.requests.iap_mut(iap_id) {
        iap.script_pids.extend(pids);
    }
}

// ===== connected =====

fn has_connected(master: &mut Master, iap_id: IapId) {
    let Some((request_id, iap)) = master.requests.iap_mut(iap_id) else {
        Error::IapNotFound(iap_id).log();
        return;
    };

    iap.set_state(IapState::Connected, &master.tx.status);
    iap.current_module = None;
    iap.stats.time_connected = Some(Utc::now());

    // Arm the per-network-type inactivity timer.
    if let Some(timeout) = iap
        .connection
        .network_type
        .as_ref()
        .and_then(|nt| master.idle_timeouts.get(nt))
    {
        iap.idle_timer =
            Some(tasks::idle_timer(iap_id, *timeout, &master.tx.input));
    }

    status::connected(&master.tx.status, iap);
    Debug::IapStatus(iap_id, IapStatus::Created).log();
    request::process_iap_status(master, request_id, IapStatus::Created);
}

// Gives the UI a chance to rename a temporary IAP before CONNECTED is
// published. Both a rename and the dialog timeout commit the transition.
fn enter_saving(master: &mut Master, iap_id: IapId) {
    let token = master.next_dlg_token;
    master.next_dlg_token += 1;

    let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
        return;
    };
    iap.set_state(IapState::Saving, &master.tx.status);
    iap.save_dlg = Some(token);
    Debug::SaveDialog(iap_id, token).log();

    let name = iap.settings_id.clone().unwrap_or_default();
    let _ = master.tx.ui.send(UiRequest::SaveDialog { token, iap: name });
    iap.save_timer =
        Some(tasks::save_timer(iap_id, SAVE_DIALOG_TIMEOUT, &master.tx.input));
}

/// Renames the settings of the IAP. In the SAVING state this also commits
/// the transition to CONNECTED.
pub(crate) fn rename(master: &mut Master, iap_id: IapId, name: &str) -> bool {
    let mut renamed = false;
    let saving = {
        let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
            Error::IapNotFound(iap_id).log();
            return false;
        };

        let old = (!iap.id_is_local).then(|| iap.settings_id.clone()).flatten();
        match old {
            Some(old) => {
                renamed = master.settings.rename(&old, name);
                if renamed {
                    info!(iap = %iap_id, %old, %name, "IAP settings renamed");
                    iap.settings_id = Some(name.to_owned());
                    if iap.connection.attrs.contains(NetworkAttrs::IAPNAME) {
                        iap.connection.id = Some(name.to_owned());
                    }
                }
            }
            None => {
                tracing::error!(iap = %iap_id, "IAP id is unset when renaming");
            }
        }

        if iap.state == IapState::Saving {
            iap.save_timer = None;
            iap.save_dlg = None;
            true
        } else {
            false
        }
    };

    if saving {
        has_connected(master, iap_id);
    }
    renamed
}

// ===== timers =====

pub(crate) fn process_idle_timeout(master: &mut Master, iap_id: IapId) {
    let connected = master
        .requests
        .iap_mut(iap_id)
        .is_some_and(|(_, iap)| iap.state == IapState::Connected);
    if connected {
        info!(iap = %iap_id, "inactivity timeout");
        disconnect(master, iap_id, None);
    }
}

pub(crate) fn process_save_timeout(master: &mut Master, iap_id: IapId) {
    let dlg = {
        let Some((_, iap)) = master.requests.iap_mut(iap_id) else {
            return;
        };
        if iap.state != IapState::Saving {
            return;
        }
        iap.save_timer = None;
        iap.save_dlg.take()
    };

    info!(iap = %iap_id, "save dialog timed out");
    ui::send_save_cancel(&master.tx.ui, dlg);
    has_connected(master, iap_id);
}

// ===== helper functions =====

fn up_state(layer: NwLayer) -> IapState {
    match layer {
        NwLayer::Link => IapState::LinkUp,
        NwLayer::LinkPost => IapState::LinkPostUp,
        NwLayer::Ip => IapState::IpUp,
        _ => IapState::SrvUp,
    }
}

fn down_state(layer: NwLayer) -> IapState {
    match layer {
        NwLayer::Link => IapState::LinkDown,
        NwLayer::LinkPost => IapState::LinkPreDown,
        NwLayer::Ip => IapState::IpDown,
        _ => IapState::SrvDown,
    }
}

fn layer_of_up_state(state: IapState) -> Option<NwLayer> {
    match state {
        IapState::LinkUp => Some(NwLayer::Link),
        IapState::LinkPostUp => Some(NwLayer::LinkPost),
        IapState::IpUp => Some(NwLayer::Ip),
        IapState::SrvUp => Some(NwLayer::Service),
        _ => None,
    }
}

fn restart_script_state(layer: NwLayer) -> Option<IapState> {
    match layer {
        NwLayer::Link => Some(IapState::LinkRestartScripts),
        NwLayer::LinkPost => Some(IapState::LinkPreRestartScripts),
        NwLayer::Ip => Some(IapState::IpRestartScripts),
        _ => None,
    }
}

fn script_envs(iap: &Iap) -> Vec<Option<ScriptEnv>> {
    if iap.script_env.is_empty() {
        vec![None]
    } else {
        iap.script_env
            .iter()
            .map(|(_, env)| Some(env.clone()))
            .collect()
    }
}

fn invoke_layer_up(
    module: &Arc<dyn NetworkModule>,
    layer: NwLayer,
    identity: &NetworkIdentity,
    ifname: Option<&str>,
    reply: LayerReply,
) {
    match layer {
        NwLayer::Link => module.link_up(identity, reply),
        NwLayer::LinkPost => module.link_post_up(identity, ifname, reply),
        NwLayer::Ip => module.ip_up(identity, ifname, reply),
        NwLayer::Service => module.srv_up(identity, ifname, reply),
        NwLayer::None | NwLayer::All => {
            reply.send(LayerStatus::Error(
                netconn_utils::network::error_tags::SYSTEM_ERROR.to_owned(),
            ));
        }
    }
}

fn invoke_layer_down(
    module: &Arc<dyn NetworkModule>,
    layer: NwLayer,
    identity: &NetworkIdentity,
    ifname: Option<&str>,
    reply: LayerReply,
) {
    match layer {
        NwLayer::Link => module.link_down(identity, ifname, reply),
        NwLayer::LinkPost => module.link_pre_down(identity, ifname, reply),
        NwLayer::Ip => module.ip_down(identity, ifname, reply),
        NwLayer::Service => module.srv_down(identity, ifname, reply),
        NwLayer::None | NwLayer::All => {
            reply.send(LayerStatus::Ok(LayerUp::default()));
        }
    }
}
