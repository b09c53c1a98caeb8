//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use netconn_utils::network::NetworkAttrs;
use tracing::debug;

use crate::settings::Settings;

// Preferred service network priority.
const PRIO_SRV_PREF: u32 = 500;

// WLAN network prefix and priority.
const TYPE_WLAN_PREFIX: &str = "WLAN_";
const PRIO_WLAN: u32 = 60;

// WiMAX network.
const TYPE_WIMAX: &str = "WIMAX";
const PRIO_WIMAX: u32 = 50;

// GPRS network.
const TYPE_GPRS: &str = "GPRS";
const PRIO_GPRS: u32 = 45;

// GSM and CDMA packet data networks.
const TYPE_DUN_GSM_PS: &str = "DUN_GSM_PS";
const TYPE_DUN_CDMA_PSD: &str = "DUN_CDMA_PSD";
const PRIO_DUN_PS: u32 = 40;

// GSM and CDMA circuit switched networks.
const TYPE_DUN_GSM_CS: &str = "DUN_GSM_CS";
const TYPE_DUN_CDMA_CSD: &str = "DUN_CDMA_CSD";
const TYPE_DUN_CDMA_QNC: &str = "DUN_CDMA_QNC";
const PRIO_DUN_CS: u32 = 30;

// The saved IAP priority is made higher.
const PRIO_SAVED_BOOSTER: u32 = 100;

// Settings keys holding the preferred service.
const PREFERRED_SERVICE_TYPE: &str = "srv_provider/preferred_type";
const PREFERRED_SERVICE_ID: &str = "srv_provider/preferred_id";

/// Preferred service provider strings, read once at startup and kept for
/// the process lifetime.
#[derive(Clone, Debug, Default)]
pub struct PreferredService {
    pub service_type: Option<String>,
    pub service_id: Option<String>,
}

// ===== impl PreferredService =====

impl PreferredService {
    /// (Re)reads the preferred service type and id from the settings.
    pub fn init(settings: &Settings) -> PreferredService {
        let service_type = settings.get_string(None, PREFERRED_SERVICE_TYPE);
        let service_id = settings.get_string(None, PREFERRED_SERVICE_ID);
        debug!(?service_type, ?service_id, "preferred service");
        PreferredService {
            service_type,
            service_id,
        }
    }

    fn matches(&self, service: Option<(&str, &str)>) -> bool {
        match (service, &self.service_type, &self.service_id) {
            (Some((srv_type, srv_id)), Some(pref_type), Some(pref_id)) => {
                srv_type == pref_type && srv_id == pref_id
            }
            _ => false,
        }
    }
}

// ===== global functions =====

/// Computes the priority of a network for candidate ordering. A matching
/// preferred service overrides the per-type priority; saved IAPs get a
/// booster on top.
pub fn network_priority(
    preferred: &PreferredService,
    service: Option<(&str, &str)>,
    network_type: Option<&str>,
    network_attrs: NetworkAttrs,
) -> u32 {
    let mut priority = match network_type {
        Some(nt) if nt.starts_with(TYPE_WLAN_PREFIX) => PRIO_WLAN,
        Some(TYPE_WIMAX) => PRIO_WIMAX,
        Some(TYPE_GPRS) => PRIO_GPRS,
        Some(TYPE_DUN_GSM_PS | TYPE_DUN_CDMA_PSD) => PRIO_DUN_PS,
        Some(TYPE_DUN_GSM_CS | TYPE_DUN_CDMA_CSD | TYPE_DUN_CDMA_QNC) => {
            PRIO_DUN_CS
        }
        _ => 0,
    };

    if preferred.matches(service) {
        priority += PRIO_SRV_PREF;
    }
    if network_attrs.contains(NetworkAttrs::IAPNAME) {
        priority += PRIO_SAVED_BOOSTER;
    }

    priority
}
