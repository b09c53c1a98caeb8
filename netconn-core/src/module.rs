//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use netconn_utils::network::{NetworkModule, NwLayer};
use tracing::{debug, warn};

// Ordered list of modules driven for one network type.
pub type ModuleChain = Vec<Arc<dyn NetworkModule>>;

/// Registry of all network modules, in registration order.
///
/// Read-only after daemon initialization.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn NetworkModule>>,
}

// ===== impl ModuleRegistry =====

impl ModuleRegistry {
    /// Registers a network module.
    pub fn register(&mut self, module: Arc<dyn NetworkModule>) {
        if module.provides().is_empty() {
            warn!(module = %module.name(), "module implements no layer functions");
        }
        debug!(module = %module.name(), types = ?module.network_types(),
            "module registered");
        self.modules.push(module);
    }

    /// Resolves the module chain for a network type: the first module
    /// registered for the type, followed by the modules it chains to
    /// through their next-layer hints.
    pub fn chain_for(&self, network_type: &str) -> ModuleChain {
        let mut chain: ModuleChain = Vec::new();

        let for_type = |module: &&Arc<dyn NetworkModule>| {
            module
                .network_types()
                .iter()
                .any(|nt| nt == network_type)
        };

        let Some(first) = self.modules.iter().find(for_type) else {
            return chain;
        };
        chain.push(first.clone());

        // Follow the next-layer hints.
        let mut next = first.next_layer();
        while next != NwLayer::None {
            let link = self.modules.iter().filter(for_type).find(|module| {
                module.provides().intersects(next.up_fn() | next.down_fn())
                    && !chain.iter().any(|m| {
                        std::ptr::addr_eq(Arc::as_ptr(m), Arc::as_ptr(*module))
                    })
            });
            match link {
                Some(module) => {
                    chain.push(module.clone());
                    next = module.next_layer();
                }
                None => break,
            }
        }

        chain
    }

    /// Iterates over all registered modules.
    pub fn foreach(&self, mut f: impl FnMut(&Arc<dyn NetworkModule>)) {
        for module in &self.modules {
            f(module);
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self
            .modules
            .iter()
            .map(|module| module.name().to_owned())
            .collect::<Vec<_>>();
        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}
