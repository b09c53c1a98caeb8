//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::script::ScriptEnv;

// Useful type definition(s).
pub type IapId = u32;
pub type LayerReplySender = UnboundedSender<LayerReplyMsg>;

// Client-visible connection error tags.
//
// These are the wire-level error names published to clients when a
// connection attempt fails; network modules report them through
// [`LayerStatus::Error`].
pub mod error_tags {
    pub const NETWORK_ERROR: &str = "com.nokia.icd.error.network_error";
    pub const SYSTEM_ERROR: &str = "com.nokia.icd.error.system_error";
    pub const INVALID_IAP: &str = "com.nokia.icd.error.invalid_iap";
    pub const IAP_IN_USE: &str = "com.nokia.icd.error.iap_in_use";
}

bitflags! {
    // Network attributes carried alongside a network type and id.
    //
    // The low-order bits form the locality field; the high bits are
    // individual flags. IAPNAME indicates the id refers to a persisted
    // settings entry rather than a transient network name.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct NetworkAttrs: u32 {
        const IAPNAME = 0x0100_0000;
        const SILENT = 0x0200_0000;
        const AUTOCONNECT = 0x0400_0000;
        const LOCALMASK = 0x00FF_FFFF;
    }
}

/// Identity of one network: `(type, attributes, id)`.
///
/// Modules may refine any part of the triple while a connection is being
/// brought up, so all three parts are optional until the link layer has
/// settled them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NetworkIdentity {
    pub network_type: Option<String>,
    pub attrs: NetworkAttrs,
    pub id: Option<String>,
}

// The layered rungs of connection bring-up.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum NwLayer {
    None,
    Link,
    LinkPost,
    Ip,
    Service,
    All,
}

bitflags! {
    // Layer functions a network module declares to implement. A missing
    // function is legal and means "skip this layer for this module".
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LayerFns: u16 {
        const LINK_UP = 0x0001;
        const LINK_DOWN = 0x0002;
        const LINK_POST_UP = 0x0004;
        const LINK_PRE_DOWN = 0x0008;
        const IP_UP = 0x0010;
        const IP_DOWN = 0x0020;
        const SRV_UP = 0x0040;
        const SRV_DOWN = 0x0080;
    }
}

/// Successful layer completion data. Everything is optional; whatever is
/// present is merged into the connection attempt.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct LayerUp {
    // Refined network identity, if the module narrowed it down.
    pub identity: Option<NetworkIdentity>,
    // Interface name, set by the link layer and consumed above it.
    pub interface_name: Option<String>,
    // Environment bag for the pre-down and post-down scripts.
    pub env: Option<ScriptEnv>,
    // Service layer reports a restricted connection (e.g. a captive
    // portal) through this flag.
    pub limited: bool,
}

/// Status reported by a module layer function through its completion
/// callback.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum LayerStatus {
    /// The layer came up (or went down).
    Ok(LayerUp),
    /// The layer came up and refined the identity in a way that must be
    /// re-checked for collisions against other connection attempts.
    OkNewIap(LayerUp),
    /// The layer failed; tear down what was already brought up.
    Error(String),
    /// Restart the connection from the given layer.
    Restart(NwLayer),
}

// Correlation token for one layer function invocation. The sequence
// number makes late callbacks from a superseded invocation detectable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LayerToken {
    pub iap: IapId,
    pub seq: u64,
}

// Completion message delivered by a module layer function.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct LayerReplyMsg {
    pub token: LayerToken,
    pub status: LayerStatus,
}

/// Completion handle handed to a module layer function. The module calls
/// [`LayerReply::send`] exactly once, immediately or later.
#[derive(Clone, Debug)]
pub struct LayerReply {
    token: LayerToken,
    tx: LayerReplySender,
}

/// One pluggable network module.
///
/// A module declares the layer functions it implements through
/// [`NetworkModule::provides`]; only declared functions are ever invoked.
/// Every layer function is asynchronous: it receives a [`LayerReply`] and
/// reports completion through it. Modules keep their own per-connection
/// state internally, keyed by the identity they are given.
pub trait NetworkModule: Send + Sync {
    /// Module name, for logging.
    fn name(&self) -> &str;

    /// Network types this module can bring up.
    fn network_types(&self) -> Vec<String>;

    /// The layer functions this module implements.
    fn provides(&self) -> LayerFns;

    /// Layer the next module in the chain should provide, if any.
    fn next_layer(&self) -> NwLayer {
        NwLayer::None
    }

    fn link_up(&self, identity: &NetworkIdentity, reply: LayerReply) {
        reply.undeclared(self.name(), "link_up");
    }

    fn link_down(
        &self,
        identity: &NetworkIdentity,
        interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        reply.undeclared(self.name(), "link_down");
    }

    fn link_post_up(
        &self,
        identity: &NetworkIdentity,
        interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        reply.undeclared(self.name(), "link_post_up");
    }

    fn link_pre_down(
        &self,
        identity: &NetworkIdentity,
        interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        reply.undeclared(self.name(), "link_pre_down");
    }

    fn ip_up(
        &self,
        identity: &NetworkIdentity,
        interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        reply.undeclared(self.name(), "ip_up");
    }

    fn ip_down(
        &self,
        identity: &NetworkIdentity,
        interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        reply.undeclared(self.name(), "ip_down");
    }

    fn srv_up(
        &self,
        identity: &NetworkIdentity,
        interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        reply.undeclared(self.name(), "srv_up");
    }

    fn srv_down(
        &self,
        identity: &NetworkIdentity,
        interface_name: Option<&str>,
        reply: LayerReply,
    ) {
        reply.undeclared(self.name(), "srv_down");
    }
}

// ===== impl NetworkAttrs =====

impl NetworkAttrs {
    /// Locality field of the attributes.
    pub fn locality(&self) -> u32 {
        (*self & NetworkAttrs::LOCALMASK).bits()
    }
}

// ===== impl NetworkIdentity =====

impl NetworkIdentity {
    pub fn new(
        network_type: Option<impl Into<String>>,
        attrs: NetworkAttrs,
        id: Option<impl Into<String>>,
    ) -> NetworkIdentity {
        NetworkIdentity {
            network_type: network_type.map(Into::into),
            attrs,
            id: id.map(Into::into),
        }
    }

    /// Identity equality: locality or IAPNAME-flag match, plus type and
    /// id match. Absent strings only match absent strings.
    pub fn matches(&self, other: &NetworkIdentity) -> bool {
        (self.attrs.locality() == other.attrs.locality()
            || (self.attrs & NetworkAttrs::IAPNAME)
                == (other.attrs & NetworkAttrs::IAPNAME))
            && self.network_type == other.network_type
            && self.id == other.id
    }

    /// Merges refinements reported by a module into this identity.
    pub fn merge(&mut self, refined: &NetworkIdentity) {
        if refined.network_type.is_some() {
            self.network_type = refined.network_type.clone();
        }
        if !refined.attrs.is_empty() {
            self.attrs = refined.attrs;
        }
        if refined.id.is_some() {
            self.id = refined.id.clone();
        }
    }
}

impl std::fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{:#x}/{}",
            self.network_type.as_deref().unwrap_or("-"),
            self.attrs.bits(),
            self.id.as_deref().unwrap_or("-")
        )
    }
}

// ===== impl NwLayer =====

impl NwLayer {
    /// Bring-up order of the real layers.
    pub const UP_ORDER: [NwLayer; 4] =
        [NwLayer::Link, NwLayer::LinkPost, NwLayer::Ip, NwLayer::Service];

    /// The `_up` function corresponding to this layer.
    pub fn up_fn(&self) -> LayerFns {
        match self {
            NwLayer::Link => LayerFns::LINK_UP,
            NwLayer::LinkPost => LayerFns::LINK_POST_UP,
            NwLayer::Ip => LayerFns::IP_UP,
            NwLayer::Service => LayerFns::SRV_UP,
            NwLayer::None | NwLayer::All => LayerFns::empty(),
        }
    }

    /// The `_down` function corresponding to this layer.
    pub fn down_fn(&self) -> LayerFns {
        match self {
            NwLayer::Link => LayerFns::LINK_DOWN,
            NwLayer::LinkPost => LayerFns::LINK_PRE_DOWN,
            NwLayer::Ip => LayerFns::IP_DOWN,
            NwLayer::Service => LayerFns::SRV_DOWN,
            NwLayer::None | NwLayer::All => LayerFns::empty(),
        }
    }
}

impl std::fmt::Display for NwLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NwLayer::None => "none",
            NwLayer::Link => "link",
            NwLayer::LinkPost => "link-post",
            NwLayer::Ip => "ip",
            NwLayer::Service => "service",
            NwLayer::All => "all",
        };
        write!(f, "{name}")
    }
}

// ===== impl LayerReply =====

impl LayerReply {
    pub fn new(iap: IapId, seq: u64, tx: LayerReplySender) -> LayerReply {
        LayerReply {
            token: LayerToken { iap, seq },
            tx,
        }
    }

    /// Reports the completion status of the layer function.
    pub fn send(&self, status: LayerStatus) {
        let msg = LayerReplyMsg {
            token: self.token,
            status,
        };
        let _ = self.tx.send(msg);
    }

    // Default-body fallback for layer functions the module did not
    // declare. Reaching this indicates a registry bug, not a module bug.
    fn undeclared(&self, module: &str, layer_fn: &str) {
        tracing::error!(%module, %layer_fn, "undeclared layer function called");
        self.send(LayerStatus::Error(error_tags::SYSTEM_ERROR.to_owned()));
    }
}
