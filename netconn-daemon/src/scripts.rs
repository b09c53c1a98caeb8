//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use netconn_utils::script::{
    SCRIPT_TIMED_OUT, ScriptArgs, ScriptExitMsg, ScriptExitSender, ScriptPhase,
    ScriptPid, ScriptRunner,
};
use netconn_utils::task::Task;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

/// Runs the per-phase connection scripts from the configured directory.
///
/// Each phase is one executable named after the phase; the connection
/// parameters and the layer env bags arrive in the environment. A script
/// exceeding the timeout is killed and reported with the synthetic
/// timeout exit value.
pub struct SystemScriptRunner {
    script_dir: PathBuf,
    timeout: Duration,
    // Token source for spawns that never produced a real process.
    next_synthetic_pid: AtomicI32,
}

// ===== impl SystemScriptRunner =====

impl SystemScriptRunner {
    pub fn new(script_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        SystemScriptRunner {
            script_dir: script_dir.into(),
            timeout,
            next_synthetic_pid: AtomicI32::new(-2),
        }
    }

    fn spawn(
        &self,
        phase: ScriptPhase,
        args: ScriptArgs<'_>,
        remove_proxies: Option<bool>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        let path = self.script_dir.join(phase.to_string());

        let mut command = Command::new(&path);
        command.env("MODE", phase.to_string());
        if let Some(ifname) = args.interface_name {
            command.env("IFACE", ifname);
        }
        if let Some(id) = args.id {
            command.env("IAP_ID", id);
        }
        if let Some(network_type) = args.network_type {
            command.env("NETWORK_TYPE", network_type);
        }
        if let Some(remove_proxies) = remove_proxies {
            command.env("REMOVE_PROXIES", if remove_proxies { "1" } else { "0" });
        }
        if let Some(env) = args.env {
            if let Some(addrfam) = &env.addrfam {
                command.env("ADDRFAM", addrfam);
            }
            for (name, value) in &env.vars {
                command.env(name, value);
            }
        }

        match command.spawn() {
            Ok(mut child) => {
                let pid = child
                    .id()
                    .map(|pid| pid as ScriptPid)
                    .unwrap_or_else(|| self.synthetic_pid());
                debug!(script = %path.display(), %pid, "script started");

                let exit_tx = exit_tx.clone();
                let timeout = self.timeout;
                let mut task = Task::spawn(async move {
                    let exit_value =
                        match time::timeout(timeout, child.wait()).await {
                            Ok(Ok(status)) => status.code().unwrap_or(1),
                            Ok(Err(_)) => 1,
                            Err(_) => {
                                let _ = child.kill().await;
                                SCRIPT_TIMED_OUT
                            }
                        };
                    let _ = exit_tx.send(ScriptExitMsg { pid, exit_value });
                });
                task.detach();
                pid
            }
            Err(error) => {
                // No script for this phase is not an error worth failing
                // the connection over; report a clean exit.
                warn!(script = %path.display(), %error,
                    "could not start script");
                let pid = self.synthetic_pid();
                let _ = exit_tx.send(ScriptExitMsg { pid, exit_value: 0 });
                pid
            }
        }
    }

    fn synthetic_pid(&self) -> ScriptPid {
        self.next_synthetic_pid.fetch_sub(1, Ordering::Relaxed)
    }
}

impl ScriptRunner for SystemScriptRunner {
    fn pre_up(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.spawn(ScriptPhase::PreUp, args, None, exit_tx)
    }

    fn post_up(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.spawn(ScriptPhase::PostUp, args, None, exit_tx)
    }

    fn pre_down(
        &self,
        args: ScriptArgs<'_>,
        remove_proxies: bool,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.spawn(ScriptPhase::PreDown, args, Some(remove_proxies), exit_tx)
    }

    fn post_down(
        &self,
        args: ScriptArgs<'_>,
        exit_tx: &ScriptExitSender,
    ) -> ScriptPid {
        self.spawn(ScriptPhase::PostDown, args, None, exit_tx)
    }

    fn cancel(&self, pid: ScriptPid) {
        if pid <= 0 {
            return;
        }
        if let Err(error) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(%pid, %error, "script already gone");
        }
    }
}
