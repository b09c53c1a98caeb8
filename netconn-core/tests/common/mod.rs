//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use netconn_core::iap::IapState;
use netconn_core::module::ModuleRegistry;
use netconn_core::request::{
    self, RequestAttrs, RequestId, RequestUpdateMsg, RequestStatus,
};
use netconn_core::settings::Settings;
use netconn_core::status::StatusSignal;
use netconn_core::tasks::messages::input::InputMsg;
use netconn_core::ui::UiRequest;
use netconn_core::{Master, MasterChannelsRx, channels};
use netconn_utils::Database;
use netconn_utils::network::{
    IapId, LayerFns, LayerReply, LayerStatus, LayerUp, NetworkAttrs,
    NetworkIdentity, NetworkModule, NwLayer,
};
use netconn_utils::script::{
    ScriptArgs, ScriptEnv, ScriptExitMsg, ScriptExitSender, ScriptPhase,
    ScriptPid, ScriptRunner,
};
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

// ===== stub network module =====

#[derive(Clone)]
pub enum UpBehavior {
    Ok(LayerUp),
    Error(String),
    NewIap(NetworkIdentity),
    Restart(NwLayer),
    // Keep the reply for manual firing.
    Hold,
}

pub struct StubModule {
    name: String,
    types: Vec<String>,
    provides: LayerFns,
    next: NwLayer,
    behaviors: Mutex<HashMap<NwLayer, UpBehavior>>,
    // Layer function invocations, in order.
    pub calls: Mutex<Vec<String>>,
    // Held replies from `UpBehavior::Hold`.
    pub held: Mutex<Vec<(String, LayerReply)>>,
}

impl StubModule {
    pub fn new(
        name: &str,
        network_type: &str,
        provides: LayerFns,
    ) -> StubModule {
        StubModule {
            name: name.to_owned(),
            types: vec![network_type.to_owned()],
            provides,
            next: NwLayer::None,
            behaviors: Default::default(),
            calls: Default::default(),
            held: Default::default(),
        }
    }

    pub fn with_next(mut self, next: NwLayer) -> StubModule {
        self.next = next;
        self
    }

    pub fn with_behavior(self, layer: NwLayer, behavior: UpBehavior) -> Self {
        self.behaviors.lock().unwrap().insert(layer, behavior);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    // Fires every held reply with a default success.
    pub fn release_held(&self) {
        for (_, reply) in self.held.lock().unwrap().drain(..) {
            reply.send(LayerStatus::Ok(LayerUp::default()));
        }
    }

    fn up(&self, layer: NwLayer, reply: LayerReply) {
        let call = format!("{}_up", tag(layer));
        self.calls.lock().unwrap().push(call.clone());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&layer)
            .cloned()
            .unwrap_or(UpBehavior::Ok(LayerUp::default()));
        match behavior {
            UpBehavior::Ok(up) => reply.send(LayerStatus::Ok(up)),
            UpBehavior::Error(err) => reply.send(LayerStatus::Error(err)),
            UpBehavior::NewIap(identity) => {
                reply.send(LayerStatus::OkNewIap(LayerUp {
                    identity: Some(identity),
                    ..Default::default()
                }));
            }
            UpBehavior::Restart(restart_layer) => {
                reply.send(LayerStatus::Restart(restart_layer));
            }
            UpBehavior::Hold => {
                self.held.lock().unwrap().push((call, reply));
            }
        }
    }

    fn down(&self, call: &str, reply: LayerReply) {
        self.calls.lock().unwrap().push(call.to_owned());
        reply.send(LayerStatus::Ok(LayerUp::default()));
    }
}

fn tag(layer: NwLayer) -> &'static str {
    match layer {
        NwLayer::Link => "link",
        NwLayer::LinkPost => "link_post",
        NwLayer::Ip => "ip",
        NwLayer::Service => "srv",
        NwLayer::None | NwLayer::All => "none",
    }
}

impl NetworkModule for StubModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn network_types(&self) -> Vec<String> {
        self.types.clone()
    }

    fn provides(&self) -> LayerFns {
        self.provides
    }

    fn next_layer(&self) -> NwLayer {
        self.next
    }

    fn link_up(&self, _identity: &NetworkIdentity, reply: LayerReply) {
        self.up(NwLayer::Link, reply);
    }

    fn link_down(
        &self,
        _identity: &NetworkIdentity,
        _interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        self.down("link_down", reply);
    }

    fn link_post_up(
        &self,
        _identity: &NetworkIdentity,
        _interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        self.up(NwLayer::LinkPost, reply);
    }

    fn link_pre_down(
        &self,
        _identity: &NetworkIdentity,
        _interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        self.down("link_pre_down", reply);
    }

    fn ip_up(
        &self,
        _identity: &NetworkIdentity,
        _interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        self.up(NwLayer::Ip, reply);
    }

    fn ip_down(
        &self,
        _identity: &NetworkIdentity,
        _interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        self.down("ip_down", reply);
    }

    fn srv_up(
        &self,
        _identity: &NetworkIdentity,
        _interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        self.up(NwLayer::Service, reply);
    }

    fn srv_down(
        &self,
        _identity: &NetworkIdentity,
        _interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        self.down("srv_down", reply);
    }
}

// ===== stub script runner =====

#[derive(Clone, Debug)]
pub struct Launch {
    pub pid: ScriptPid,
    pub phase: ScriptPhase,
    pub id: Option<String>,
    pub interface_name: Option<String>,
    pub remove_proxies: Option<bool>,
    pub env: Option<ScriptEnv>,
}

pub struct StubScriptRunner {
    // When set, every script exits immediately with this value.
    auto_exit: Option<i32>,
    next_pid: AtomicI32,
    pub launches: Mutex<Vec<Launch>>,
    pub cancelled: Mutex<Vec<ScriptPid>>,
}

impl StubScriptRunner {
    pub fn new(auto_exit: Option<i32>) -> StubScriptRunner {
        StubScriptRunner {
            auto_exit,
            next_pid: AtomicI32::new(1000),
            launches: Default::default(),
            cancelled: Default::default(),
        }
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launches_for(&self, phase: ScriptPhase) -> Vec<Launch> {
        self.launches()
            .into_iter()
            .filter(|launch| launch.phase == phase)
            .collect()
    }

    fn record(
        &self,
        phase: ScriptPhase,
        args: &ScriptArgs<'_>,
        remove_proxies: Option<bool>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        self.launches.lock().unwrap().push(Launch {
            pid,
            phase,
            id: args.id.map(str::to_owned),
            interface_name: args.interface_name.map(str::to_owned),
            remove_proxies,
            env: args.env.cloned(),
        });
        if let Some(exit_value) = self.auto_exit {
            let _ = exit_tx.send(ScriptExitMsg { pid, exit_value });
        }
        pid
    }
}

impl ScriptRunner for StubScriptRunner {
    fn pre_up(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.record(ScriptPhase::PreUp, &args, None, exit_tx)
    }

    fn post_up(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.record(ScriptPhase::PostUp, &args, None, exit_tx)
    }

    fn pre_down(
        &self,
        args: ScriptArgs<'_>,
        remove_proxies: bool,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.record(ScriptPhase::PreDown, &args, Some(remove_proxies), exit_tx)
    }

    fn post_down(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.record(ScriptPhase::PostDown, &args, None, exit_tx)
    }

    fn cancel(&self, pid: ScriptPid) {
        self.cancelled.lock().unwrap().push(pid);
    }
}

// ===== test bed =====

pub struct TestBed {
    pub master: Master,
    pub rx: MasterChannelsRx,
    pub status_rx: UnboundedReceiver<StatusSignal>,
    pub ui_rx: UnboundedReceiver<UiRequest>,
    pub scripts: Arc<StubScriptRunner>,
}

impl TestBed {
    /// Builds a master driven synchronously by the test, with the given
    /// modules registered. `auto_scripts` makes every script exit with 0
    /// as soon as it is launched.
    pub fn new(modules: Vec<Arc<StubModule>>, auto_scripts: bool) -> TestBed {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (tx, rx) = channels(status_tx, ui_tx);

        let mut registry = ModuleRegistry::default();
        for module in modules {
            registry.register(module);
        }

        let scripts =
            Arc::new(StubScriptRunner::new(auto_scripts.then_some(0)));
        let settings = Settings::new(test_db());

        let master = Master::new(
            registry,
            scripts.clone(),
            settings,
            Default::default(),
            tx,
        );

        TestBed {
            master,
            rx,
            status_rx,
            ui_rx,
            scripts,
        }
    }

    /// Processes queued events until every channel is drained.
    pub fn drive(&mut self) {
        loop {
            if let Ok(msg) = self.rx.input.try_recv() {
                self.master.process_msg(msg);
                continue;
            }
            if let Ok(msg) = self.rx.layer.try_recv() {
                self.master.process_msg(InputMsg::Layer(msg));
                continue;
            }
            if let Ok(msg) = self.rx.script_exit.try_recv() {
                self.master.process_msg(InputMsg::ScriptExit(msg));
                continue;
            }
            break;
        }
    }

    pub fn submit(
        &mut self,
        identity: NetworkIdentity,
        attrs: RequestAttrs,
    ) -> (RequestId, UnboundedReceiver<RequestUpdateMsg>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let request_id =
            request::submit(&mut self.master, identity, attrs, Some(notify_tx));
        (request_id, notify_rx)
    }

    pub fn deliver_script_exit(&mut self, pid: ScriptPid, exit_value: i32) {
        self.master.process_msg(InputMsg::ScriptExit(ScriptExitMsg {
            pid,
            exit_value,
        }));
        self.drive();
    }

    /// Drains the status channel into the observed state sequence.
    pub fn states(&mut self) -> Vec<IapState> {
        let mut states = Vec::new();
        while let Ok(signal) = self.status_rx.try_recv() {
            if let StatusSignal::State { state, .. } = signal {
                states.push(state);
            }
        }
        states
    }

    pub fn iap_id(&self, identity: &NetworkIdentity) -> Option<IapId> {
        self.master
            .requests
            .find_iap(identity)
            .map(|(_, iap)| iap.id)
    }
}

// ===== helper functions =====

pub fn test_db() -> Database {
    static NEXT: AtomicI32 = AtomicI32::new(0);
    let path = std::env::temp_dir().join(format!(
        "netconn-test-{}-{}.db",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed),
    ));
    Arc::new(Mutex::new(PickleDb::new(
        path,
        PickleDbDumpPolicy::NeverDump,
        SerializationMethod::Json,
    )))
}

pub fn wlan_identity(id: &str) -> NetworkIdentity {
    NetworkIdentity::new(
        Some("WLAN_INFRA"),
        NetworkAttrs::IAPNAME,
        Some(id),
    )
}

pub fn full_module(network_type: &str) -> StubModule {
    StubModule::new("stub", network_type, LayerFns::all())
}

pub fn statuses(
    rx: &mut UnboundedReceiver<RequestUpdateMsg>,
) -> Vec<RequestStatus> {
    let mut statuses = Vec::new();
    while let Ok(update) = rx.try_recv() {
        statuses.push(update.status);
    }
    statuses
}
