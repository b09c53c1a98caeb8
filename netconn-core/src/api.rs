//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::Utc;
use enum_as_inner::EnumAsInner;
use netconn_utils::network::{NetworkAttrs, NetworkIdentity, error_tags};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::Master;
use crate::iap::IapState;
use crate::request::{self, RequestAttrs, RequestNotifySender};
use crate::settings::KEY_TYPE;

// The client method interface.
pub const API_INTERFACE: &str = "com.nokia.icd";
pub const API_ACTIVATE_REQ: &str = "activate";
pub const API_CONNECT_REQ: &str = "connect";
pub const API_DISCONNECT_REQ: &str = "disconnect";
pub const API_GET_IPINFO_REQ: &str = "get_ipinfo";
pub const API_GET_STATISTICS_REQ: &str = "get_statistics";
pub const API_GET_STATE_REQ: &str = "get_state";
pub const API_BG_KILLED_REQ: &str = "background_killing_application";

// Standardized reply for messages no handler accepts.
const ERROR_NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";

// Useful type definition(s).
pub type ApiReplySender = UnboundedSender<ApiReply>;

/// One inbound client method message, already lifted off the transport.
#[derive(Debug)]
pub struct ApiMessage {
    pub interface: String,
    pub member: String,
    pub signature: String,
    pub args: Vec<ApiArg>,
    /// Reply channel; absent for fire-and-forget transports.
    pub reply_tx: Option<ApiReplySender>,
    /// Tracking channel attached by the transport for connection
    /// requests.
    pub notify: Option<RequestNotifySender>,
}

#[derive(Clone, Debug, EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum ApiArg {
    Str(String),
    U32(u32),
    Bool(bool),
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum ApiReply {
    Ok(Vec<ApiArg>),
    Error { name: String, message: String },
}

// Matches an inbound message with the handler function serving it.
struct Handler {
    interface: &'static str,
    member: &'static str,
    signature: &'static str,
    handler: fn(&mut Master, &ApiMessage) -> Option<ApiReply>,
}

// Client method handlers.
const API_HANDLERS: &[Handler] = &[
    Handler {
        interface: API_INTERFACE,
        member: API_ACTIVATE_REQ,
        signature: "s",
        handler: process_activate,
    },
    Handler {
        interface: API_INTERFACE,
        member: API_CONNECT_REQ,
        signature: "su",
        handler: process_connect,
    },
    Handler {
        interface: API_INTERFACE,
        member: API_DISCONNECT_REQ,
        signature: "s",
        handler: process_disconnect,
    },
    Handler {
        interface: API_INTERFACE,
        member: API_GET_IPINFO_REQ,
        signature: "",
        handler: process_get_ipinfo,
    },
    Handler {
        interface: API_INTERFACE,
        member: API_GET_STATISTICS_REQ,
        signature: "",
        handler: process_get_statistics,
    },
    Handler {
        interface: API_INTERFACE,
        member: API_GET_STATISTICS_REQ,
        signature: "s",
        handler: process_get_statistics,
    },
    Handler {
        interface: API_INTERFACE,
        member: API_GET_STATE_REQ,
        signature: "",
        handler: process_get_state,
    },
    Handler {
        interface: API_INTERFACE,
        member: API_BG_KILLED_REQ,
        signature: "ss",
        handler: process_bg_killed,
    },
];

// ===== global functions =====

/// Dispatches one inbound method message. `None` from a handler means
/// the reply is published asynchronously later.
pub(crate) fn process_msg(master: &mut Master, msg: ApiMessage) {
    let handler = API_HANDLERS.iter().find(|handler| {
        handler.interface == msg.interface
            && handler.member == msg.member
            && handler.signature == msg.signature
    });

    let reply = match handler {
        Some(handler) => {
            info!(interface = %msg.interface, member = %msg.member,
                signature = %msg.signature, "received request");
            (handler.handler)(master, &msg)
        }
        None => {
            info!(interface = %msg.interface, member = %msg.member,
                "received request is not recognized");
            Some(ApiReply::Error {
                name: ERROR_NOT_SUPPORTED.to_owned(),
                message: "Unsupported interface or method".to_owned(),
            })
        }
    };

    if let Some(reply) = reply
        && let Some(reply_tx) = &msg.reply_tx
    {
        let _ = reply_tx.send(reply);
    }
}

fn process_activate(
    master: &mut Master,
    msg: &ApiMessage,
) -> Option<ApiReply> {
    let name = msg.args.first()?.as_str()?.clone();
    let network_type = master.settings.get_string(Some(&name), KEY_TYPE);
    let identity = NetworkIdentity::new(
        network_type,
        NetworkAttrs::IAPNAME,
        Some(name),
    );
    request::submit(
        master,
        identity,
        RequestAttrs::CONN_UI | RequestAttrs::USER,
        msg.notify.clone(),
    );
    Some(ApiReply::Ok(Vec::new()))
}

fn process_connect(master: &mut Master, msg: &ApiMessage) -> Option<ApiReply> {
    let name = msg.args.first()?.as_str()?.clone();
    let flags = *msg.args.get(1)?.as_u32()?;

    let attrs =
        NetworkAttrs::from_bits_truncate(flags) | NetworkAttrs::IAPNAME;
    let network_type = master.settings.get_string(Some(&name), KEY_TYPE);
    let identity = NetworkIdentity::new(network_type, attrs, Some(name));
    request::submit(
        master,
        identity,
        RequestAttrs::DBUS,
        msg.notify.clone(),
    );
    Some(ApiReply::Ok(Vec::new()))
}

fn process_disconnect(
    master: &mut Master,
    msg: &ApiMessage,
) -> Option<ApiReply> {
    let name = msg.args.first()?.as_str()?.clone();

    match master.requests.find_by_name(&name) {
        Some(request_id) => {
            request::cancel(master, request_id, RequestAttrs::DBUS);
            Some(ApiReply::Ok(Vec::new()))
        }
        None => Some(ApiReply::Error {
            name: error_tags::INVALID_IAP.to_owned(),
            message: format!("no connection for '{name}'"),
        }),
    }
}

fn process_get_ipinfo(
    master: &mut Master,
    _msg: &ApiMessage,
) -> Option<ApiReply> {
    let mut args = Vec::new();
    master.requests.foreach_iap(|iap| {
        if iap.state == IapState::Connected {
            args.push(ApiArg::Str(
                iap.connection.network_type.clone().unwrap_or_default(),
            ));
            args.push(ApiArg::Str(
                iap.settings_id.clone().unwrap_or_default(),
            ));
            args.push(ApiArg::Str(
                iap.interface_name.clone().unwrap_or_default(),
            ));
        }
        true
    });
    Some(ApiReply::Ok(args))
}

fn process_get_statistics(
    master: &mut Master,
    msg: &ApiMessage,
) -> Option<ApiReply> {
    let name = msg
        .args
        .first()
        .and_then(|arg| arg.as_str())
        .cloned();

    let mut args = Vec::new();
    master.requests.foreach_iap(|iap| {
        if iap.state != IapState::Connected {
            return true;
        }
        if let Some(name) = &name
            && iap.settings_id.as_deref() != Some(name)
        {
            return true;
        }
        let uptime = iap
            .stats
            .time_connected
            .map(|since| (Utc::now() - since).num_seconds().max(0) as u32)
            .unwrap_or(0);
        args.push(ApiArg::Str(iap.settings_id.clone().unwrap_or_default()));
        args.push(ApiArg::U32(uptime));
        true
    });

    match args.is_empty() {
        true => Some(ApiReply::Error {
            name: error_tags::INVALID_IAP.to_owned(),
            message: "no matching connection".to_owned(),
        }),
        false => Some(ApiReply::Ok(args)),
    }
}

fn process_get_state(
    master: &mut Master,
    _msg: &ApiMessage,
) -> Option<ApiReply> {
    let state = master
        .requests
        .head_id()
        .and_then(|request_id| master.requests.get(request_id))
        .and_then(|request| request.try_iaps.front())
        .map(|iap| iap.state)
        .unwrap_or(IapState::Disconnected);
    Some(ApiReply::Ok(vec![ApiArg::Str(state.to_string())]))
}

fn process_bg_killed(
    _master: &mut Master,
    msg: &ApiMessage,
) -> Option<ApiReply> {
    let application = msg.args.first()?.as_str()?;
    info!(%application, "application killed in background");
    Some(ApiReply::Ok(Vec::new()))
}
