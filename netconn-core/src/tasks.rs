//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use netconn_utils::network::IapId;
use netconn_utils::task::TimeoutTask;
use tokio::sync::mpsc::UnboundedSender;

//
// Daemon task diagram:
//
//                                +--------------+
//               client/UI ->     |              | -> status signals
//          transport messages    |    master    | -> UI dialog requests
//                                |              |
//   module layer callbacks ->    |  (run loop)  | -> module layer calls
//            script exits ->     |              | -> script spawns
//          timer expiries ->     |              |
//                                +--------------+
//

// Daemon inter-task message types.
pub mod messages {
    use netconn_utils::network::{IapId, LayerReplyMsg};
    use netconn_utils::script::ScriptExitMsg;

    use crate::api::ApiMessage;
    use crate::ui::UiSignal;

    // Input messages (everything the master reacts to).
    pub mod input {
        use super::*;

        #[derive(Debug)]
        pub enum InputMsg {
            // Inbound client method message.
            Api(ApiMessage),
            // Inbound UI signal.
            Ui(UiSignal),
            // Module layer completion.
            Layer(LayerReplyMsg),
            // Script exit notification.
            ScriptExit(ScriptExitMsg),
            // Per-IAP inactivity timer expired.
            IdleTimeout(IapId),
            // Save dialog went unanswered.
            SaveTimeout(IapId),
            // A top-level settings entry disappeared.
            SettingsDeleted(String),
            // Drain all requests and exit.
            Shutdown,
        }
    }
}

// ===== daemon tasks =====

// Per-IAP inactivity timer, armed while the IAP is connected.
pub(crate) fn idle_timer(
    iap_id: IapId,
    timeout: Duration,
    input_tx: &UnboundedSender<messages::input::InputMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let input_tx = input_tx.clone();
        TimeoutTask::new(timeout, move || async move {
            let _ = input_tx.send(messages::input::InputMsg::IdleTimeout(iap_id));
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Commits the SAVING state when the save dialog goes unanswered.
pub(crate) fn save_timer(
    iap_id: IapId,
    timeout: Duration,
    input_tx: &UnboundedSender<messages::input::InputMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let input_tx = input_tx.clone();
        TimeoutTask::new(timeout, move || async move {
            let _ = input_tx.send(messages::input::InputMsg::SaveTimeout(iap_id));
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}
