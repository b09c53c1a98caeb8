//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use bitflags::bitflags;
use netconn_utils::network::{
    IapId, NetworkIdentity, error_tags,
};
use netconn_utils::script::ScriptPid;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::Master;
use crate::debug::Debug;
use crate::error::Error;
use crate::iap::{self, Iap, IapState, IapStatus};
use crate::policy::{self, PolicyDecision, RejectReason};

// Useful type definition(s).
pub type RequestId = u32;
pub type RequestNotifySender = UnboundedSender<RequestUpdateMsg>;

bitflags! {
    // Origins of a connectivity request, consumed by the policy engine.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct RequestAttrs: u32 {
        const CONN_UI = 0x01;
        const USER = 0x02;
        const DBUS = 0x04;
        const BACKGROUND = 0x08;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestState {
    Pending,
    Running,
    Satisfied,
    Cancelled,
    Failed,
}

/// Terminal and non-terminal statuses delivered to request subscribers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestStatus {
    Created,
    Disconnected,
    Busy,
    Failed(Option<String>),
}

// Status update delivered on a tracking channel.
#[derive(Clone, Debug)]
pub struct RequestUpdateMsg {
    pub request: RequestId,
    pub status: RequestStatus,
}

/// A client's intent to obtain connectivity, owning its chain of IAP
/// attempts.
#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub attrs: RequestAttrs,
    pub state: RequestState,
    // Identity the client asked for; candidates are derived from it.
    pub requested: NetworkIdentity,
    // Head is the currently active attempt.
    pub try_iaps: VecDeque<Iap>,
    // Candidate identities still to try, produced by the policy engine.
    pub(crate) candidates: Vec<NetworkIdentity>,
    pub(crate) next_candidate: usize,
    // Subscribers notified on state transitions.
    pub tracking: Vec<RequestNotifySender>,
}

/// The daemon request list. Requests are created by the client API
/// surface and mutated only here.
#[derive(Debug, Default)]
pub struct RequestList {
    requests: Vec<Request>,
    next_request_id: RequestId,
    next_iap_id: IapId,
}

// ===== impl Request =====

impl Request {
    fn notify(&self, status: RequestStatus) {
        for tracking in &self.tracking {
            let _ = tracking.send(RequestUpdateMsg {
                request: self.id,
                status: status.clone(),
            });
        }
    }
}

// ===== impl RequestList =====

impl RequestList {
    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn get(&self, request_id: RequestId) -> Option<&Request> {
        self.requests.iter().find(|request| request.id == request_id)
    }

    pub fn get_mut(&mut self, request_id: RequestId) -> Option<&mut Request> {
        self.requests
            .iter_mut()
            .find(|request| request.id == request_id)
    }

    fn remove(&mut self, request_id: RequestId) -> Option<Request> {
        let pos = self
            .requests
            .iter()
            .position(|request| request.id == request_id)?;
        Some(self.requests.remove(pos))
    }

    // The head request, i.e. the oldest one still alive.
    pub fn head_id(&self) -> Option<RequestId> {
        self.requests.first().map(|request| request.id)
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        self.requests.iter().map(|request| request.id).collect()
    }

    /// Looks up an active IAP by id.
    pub fn iap_mut(&mut self, iap_id: IapId) -> Option<(RequestId, &mut Iap)> {
        self.requests.iter_mut().find_map(|request| {
            let iap = request.try_iaps.front_mut()?;
            (iap.id == iap_id).then_some((request.id, iap))
        })
    }

    // Looks up the IAP owning an outstanding script pid.
    pub(crate) fn iap_mut_by_script(
        &mut self,
        pid: ScriptPid,
    ) -> Option<(RequestId, &mut Iap)> {
        self.requests.iter_mut().find_map(|request| {
            let iap = request.try_iaps.front_mut()?;
            iap.script_pids.contains(&pid).then_some((request.id, iap))
        })
    }

    /// Finds an active IAP under identity equality.
    pub fn find_iap(
        &self,
        identity: &NetworkIdentity,
    ) -> Option<(RequestId, &Iap)> {
        self.requests.iter().find_map(|request| {
            let iap = request.try_iaps.front()?;
            iap.connection
                .matches(identity)
                .then_some((request.id, iap))
        })
    }

    // Finds the request whose active IAP carries the given settings name.
    pub(crate) fn find_by_name(&self, name: &str) -> Option<RequestId> {
        self.requests.iter().find_map(|request| {
            let iap = request.try_iaps.front()?;
            (iap.settings_id.as_deref() == Some(name)
                || iap.connection.id.as_deref() == Some(name))
            .then_some(request.id)
        })
    }

    /// Iterates over all active IAPs, stopping early when `f` returns
    /// false. Returns the id of the IAP it stopped on.
    pub fn foreach_iap(&self, mut f: impl FnMut(&Iap) -> bool) -> Option<IapId> {
        for request in &self.requests {
            if let Some(iap) = request.try_iaps.front()
                && !f(iap)
            {
                return Some(iap.id);
            }
        }
        None
    }

    // True when any IAP other than the given one is connected. Feeds the
    // remove-proxies flag of the pre-down scripts.
    pub(crate) fn any_other_connected(&self, iap_id: IapId) -> bool {
        self.foreach_iap(|iap| {
            iap.id == iap_id || iap.state != IapState::Connected
        })
        .is_some()
    }

    fn alloc_request_id(&mut self) -> RequestId {
        self.next_request_id += 1;
        self.next_request_id
    }

    pub(crate) fn alloc_iap_id(&mut self) -> IapId {
        self.next_iap_id += 1;
        self.next_iap_id
    }
}

// ===== global functions =====

/// Submits a new connectivity request. The policy engine decides whether
/// it gets a fresh IAP, merges into an existing request, or is rejected.
pub fn submit(
    master: &mut Master,
    identity: NetworkIdentity,
    attrs: RequestAttrs,
    notify: Option<RequestNotifySender>,
) -> RequestId {
    let request_id = master.requests.alloc_request_id();
    Debug::RequestSubmit(request_id, &identity).log();

    let request = Request {
        id: request_id,
        attrs,
        state: RequestState::Pending,
        requested: identity,
        try_iaps: VecDeque::new(),
        candidates: Vec::new(),
        next_candidate: 0,
        tracking: notify.into_iter().collect(),
    };
    master.requests.requests.push(request);

    make_request(master, request_id);
    request_id
}

// Consults the policy engine and acts on its decision.
fn make_request(master: &mut Master, request_id: RequestId) {
    match policy::request_make(master, request_id) {
        PolicyDecision::NewIap(identity) => {
            start_attempt(master, request_id, identity);
        }
        PolicyDecision::Merge(into_id) => {
            merge_into(master, request_id, into_id);
        }
        PolicyDecision::Reject(reason) => {
            let status = match reason {
                RejectReason::Busy => RequestStatus::Busy,
                RejectReason::NoCandidates => RequestStatus::Failed(Some(
                    error_tags::INVALID_IAP.to_owned(),
                )),
            };
            complete(master, request_id, status);
        }
    }
}

// Creates the next IAP attempt for the request and starts bringing it up.
fn start_attempt(
    master: &mut Master,
    request_id: RequestId,
    identity: NetworkIdentity,
) {
    let chain = match identity.network_type.as_deref() {
        Some(network_type) => master.modules.chain_for(network_type),
        None => Vec::new(),
    };
    if chain.is_empty() {
        Error::UnknownNetworkType(
            identity.network_type.clone().unwrap_or_default(),
        )
        .log();
        attempt_failed(
            master,
            request_id,
            Some(error_tags::INVALID_IAP.to_owned()),
        );
        return;
    }

    let save_on_connect = identity
        .id
        .as_deref()
        .is_some_and(|id| master.settings.is_temporary(Some(id)));

    let iap_id = master.requests.alloc_iap_id();
    let iap = Iap::new(iap_id, identity, chain, save_on_connect);

    let Some(request) = master.requests.get_mut(request_id) else {
        Error::RequestNotFound(request_id).log();
        return;
    };
    request.state = RequestState::Running;
    request.try_iaps.push_front(iap);

    iap::connect(master, request_id);
}

/// Cancels the request with the given origin. The active attempt is torn
/// down; the request completes DISCONNECTED, not FAILED.
pub fn cancel(master: &mut Master, request_id: RequestId, origin: RequestAttrs) {
    let Some(request) = master.requests.get_mut(request_id) else {
        Error::RequestNotFound(request_id).log();
        return;
    };
    info!(request = %request_id, ?origin, "cancelling request");
    request.attrs |= origin;

    match request.try_iaps.front() {
        Some(iap) if iap.state != IapState::Disconnected => {
            request.state = RequestState::Cancelled;
            let iap_id = iap.id;
            iap::disconnect(master, iap_id, None);
        }
        _ => {
            complete(master, request_id, RequestStatus::Disconnected);
        }
    }
}

/// Moves the trackers of `from` into `into` and retires `from`. The
/// merged request's subscribers ride along on the surviving attempt.
pub(crate) fn merge_into(
    master: &mut Master,
    from_id: RequestId,
    into_id: RequestId,
) {
    Debug::RequestMerge(from_id, into_id).log();

    let Some(from) = master.requests.get_mut(from_id) else {
        Error::RequestNotFound(from_id).log();
        return;
    };
    let tracking = std::mem::take(&mut from.tracking);
    from.state = RequestState::Cancelled;
    let active_iap = from
        .try_iaps
        .front()
        .filter(|iap| iap.state != IapState::Disconnected)
        .map(|iap| iap.id);

    let Some(into) = master.requests.get_mut(into_id) else {
        Error::RequestNotFound(into_id).log();
        return;
    };
    let satisfied = into.state == RequestState::Satisfied;
    if satisfied {
        // Already connected; the new subscribers hear about it now.
        for tracking in &tracking {
            let _ = tracking.send(RequestUpdateMsg {
                request: into_id,
                status: RequestStatus::Created,
            });
        }
    }
    into.tracking.extend(tracking);

    match active_iap {
        Some(iap_id) => {
            // The merged request completes once its abandoned attempt has
            // finished tearing down.
            iap::disconnect(master, iap_id, None);
        }
        None => {
            master.requests.remove(from_id);
        }
    }
}

// Completion channel from the IAP state machine back to the owning
// request.
pub(crate) fn process_iap_status(
    master: &mut Master,
    request_id: RequestId,
    iap_status: IapStatus,
) {
    let Some(request) = master.requests.get_mut(request_id) else {
        Error::RequestNotFound(request_id).log();
        return;
    };

    match iap_status {
        IapStatus::Created => {
            request.state = RequestState::Satisfied;
            request.notify(RequestStatus::Created);
        }
        IapStatus::Busy => {
            complete(master, request_id, RequestStatus::Busy);
        }
        IapStatus::Disconnected | IapStatus::Failed => {
            // The attempt is gone; reap it.
            let err_str = request
                .try_iaps
                .pop_front()
                .and_then(|iap| iap.err_str);
            let cancelled = request.state == RequestState::Cancelled;

            if iap_status == IapStatus::Failed
                && !cancelled
                && !master.shutting_down
            {
                attempt_failed(master, request_id, err_str);
                return;
            }

            complete(master, request_id, RequestStatus::Disconnected);
        }
    }
}

/// Cancels every request so the daemon can exit once the list drains.
pub fn shutdown(master: &mut Master) {
    info!("shutting down, draining requests");
    master.shutting_down = true;
    for request_id in master.requests.request_ids() {
        cancel(master, request_id, RequestAttrs::empty());
    }
}

// The active attempt failed; the policy engine proposes the next
// candidate, or the request fails with the last attempt's error tag.
fn attempt_failed(
    master: &mut Master,
    request_id: RequestId,
    err_str: Option<String>,
) {
    if let Some(identity) = policy::next_try(master, request_id) {
        start_attempt(master, request_id, identity);
        return;
    }
    if let Some(request) = master.requests.get_mut(request_id) {
        request.state = RequestState::Failed;
    }
    complete(master, request_id, RequestStatus::Failed(err_str));
}

// Emits the terminal status and destroys the request.
fn complete(master: &mut Master, request_id: RequestId, status: RequestStatus) {
    match master.requests.remove(request_id) {
        Some(request) => {
            info!(request = %request_id, ?status, "request complete");
            request.notify(status);
        }
        None => {
            warn!(request = %request_id, "completion for unknown request");
        }
    }
}
