//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use netconn_utils::network::{NetworkAttrs, NetworkIdentity};
use tracing::debug;

use crate::Master;
use crate::iap::IapState;
use crate::priority;
use crate::request::RequestId;
use crate::settings::KEY_TYPE;

// Per-IAP settings keys naming the service provider, used for the
// preferred-service priority boost.
const KEY_SERVICE_TYPE: &str = "service_type";
const KEY_SERVICE_ID: &str = "service_id";

/// What to do with a request, decided before each bring-up attempt.
#[derive(Debug)]
pub enum PolicyDecision {
    /// Try a fresh IAP with this identity.
    NewIap(NetworkIdentity),
    /// Fold the request into an existing one for the same network.
    Merge(RequestId),
    /// Nothing to try.
    Reject(RejectReason),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectReason {
    // The matching IAP is still tearing down.
    Busy,
    NoCandidates,
}

// ===== global functions =====

/// Decides how a freshly submitted request is served.
pub(crate) fn request_make(
    master: &mut Master,
    request_id: RequestId,
) -> PolicyDecision {
    // Build the candidate list on first consultation.
    let candidates_known = master
        .requests
        .get(request_id)
        .is_some_and(|request| !request.candidates.is_empty());
    if !candidates_known {
        let candidates = candidates_for(master, request_id);
        if let Some(request) = master.requests.get_mut(request_id) {
            request.candidates = candidates;
            request.next_candidate = 0;
        }
    }

    let Some(identity) = next_try(master, request_id) else {
        return PolicyDecision::Reject(RejectReason::NoCandidates);
    };

    // Share an existing attempt for the same network when there is one.
    let collision = master
        .requests
        .iter()
        .filter(|request| request.id != request_id)
        .find_map(|request| {
            let iap = request.try_iaps.front()?;
            (iap.state != IapState::Disconnected
                && iap.connection.matches(&identity))
            .then_some((request.id, iap.state))
        });
    if let Some((other_id, state)) = collision {
        let decision = if state > IapState::Connected {
            PolicyDecision::Reject(RejectReason::Busy)
        } else {
            PolicyDecision::Merge(other_id)
        };
        debug!(request = %request_id, ?decision, "policy decision");
        return decision;
    }

    debug!(request = %request_id, %identity, "policy proposes new IAP");
    PolicyDecision::NewIap(identity)
}

/// Proposes the next candidate identity for the request, or signals
/// exhaustion with `None`.
pub(crate) fn next_try(
    master: &mut Master,
    request_id: RequestId,
) -> Option<NetworkIdentity> {
    let request = master.requests.get_mut(request_id)?;
    let identity = request.candidates.get(request.next_candidate).cloned()?;
    request.next_candidate += 1;
    Some(identity)
}

// Candidate identities for a request: the named IAP when the client
// named one, otherwise every saved IAP ordered by network priority.
fn candidates_for(
    master: &Master,
    request_id: RequestId,
) -> Vec<NetworkIdentity> {
    let Some(request) = master.requests.get(request_id) else {
        return Vec::new();
    };
    let requested = &request.requested;

    if requested.id.is_some() || requested.network_type.is_some() {
        let mut identity = requested.clone();
        // Resolve the network type from the settings for named IAPs.
        if identity.network_type.is_none()
            && identity.attrs.contains(NetworkAttrs::IAPNAME)
        {
            identity.network_type = master
                .settings
                .get_string(identity.id.as_deref(), KEY_TYPE);
        }
        return vec![identity];
    }

    // "Any" request: saved IAPs, best first.
    let mut candidates = master
        .settings
        .iap_names()
        .into_iter()
        .map(|name| {
            let network_type =
                master.settings.get_string(Some(&name), KEY_TYPE);
            let service_type =
                master.settings.get_string(Some(&name), KEY_SERVICE_TYPE);
            let service_id =
                master.settings.get_string(Some(&name), KEY_SERVICE_ID);
            let service = service_type
                .as_deref()
                .zip(service_id.as_deref());
            let identity = NetworkIdentity::new(
                network_type,
                NetworkAttrs::IAPNAME,
                Some(name),
            );
            let priority = priority::network_priority(
                &master.preferred,
                service,
                identity.network_type.as_deref(),
                identity.attrs,
            );
            (priority, identity)
        })
        .collect::<Vec<_>>();
    candidates.sort_by(|(a, _), (b, _)| b.cmp(a));
    candidates
        .into_iter()
        .map(|(_, identity)| identity)
        .collect()
}
