//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

// Useful type definition(s).
pub type ScriptPid = i32;
pub type ScriptExitSender = UnboundedSender<ScriptExitMsg>;

/// Exit value a runner synthesizes when a script had to be killed after
/// its timeout elapsed.
pub const SCRIPT_TIMED_OUT: i32 = -1;

// Connection script phases.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ScriptPhase {
    PreUp,
    PostUp,
    PreDown,
    PostDown,
}

/// Environment bag contributed by one network layer, handed to the
/// pre-down and post-down scripts of the connection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ScriptEnv {
    // Address family label, if the layer has one (e.g. "inet").
    pub addrfam: Option<String>,
    // NAME=value pairs, exported verbatim.
    pub vars: Vec<(String, String)>,
}

// Exit notification for one spawned script.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub struct ScriptExitMsg {
    pub pid: ScriptPid,
    // Exit value of the script, or [`SCRIPT_TIMED_OUT`].
    pub exit_value: i32,
}

/// Arguments common to every script phase.
#[derive(Clone, Debug, Default)]
pub struct ScriptArgs<'a> {
    pub interface_name: Option<&'a str>,
    // Settings name of the connection, when it has one.
    pub id: Option<&'a str>,
    pub network_type: Option<&'a str>,
    pub env: Option<&'a ScriptEnv>,
}

/// Spawns connection scripts and reports their exits.
///
/// Each spawn returns a process-id token; the runner must deliver exactly
/// one [`ScriptExitMsg`] for it on the given sender, even when the script
/// is cancelled early through [`ScriptRunner::cancel`].
pub trait ScriptRunner: Send + Sync {
    fn pre_up(&self, args: ScriptArgs<'_>, exit_tx: &ScriptExitSender)
    -> ScriptPid;

    fn post_up(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid;

    fn pre_down(
        &self,
        args: ScriptArgs<'_>,
        remove_proxies: bool,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid;

    fn post_down(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid;

    /// Requests early termination of a previously spawned script.
    fn cancel(&self, pid: ScriptPid);
}

// ===== impl ScriptPhase =====

impl std::fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScriptPhase::PreUp => "pre-up",
            ScriptPhase::PostUp => "post-up",
            ScriptPhase::PreDown => "pre-down",
            ScriptPhase::PostDown => "post-down",
        };
        write!(f, "{name}")
    }
}
