//! Plugin trait and host.
//!
//! Plugins extend the connection through the hook registry. The host keeps
//! the active set, rejects duplicate names, and tears plugins down on
//! removal or connection destroy. Hook cleanup is each plugin's own job:
//! `destroy` must release the [`HookGuard`]s it obtained in
//! `register_hooks`, otherwise stale callbacks keep firing.

use tracing::debug;

use crate::hooks::{HookContext, HookRegistry};

/// A connection extension.
pub trait Plugin: Send {
    /// Unique name. Adding a second plugin with an active name is a no-op.
    fn name(&self) -> &str;

    /// Called once when the plugin is added to a connection.
    fn init(&mut self, _ctx: &HookContext) {}

    /// Registers hook callbacks. The plugin should retain the returned
    /// guards so `destroy` can release them.
    fn register_hooks(&mut self, _hooks: &mut HookRegistry) {}

    /// Called when the plugin is removed or the connection is destroyed.
    fn destroy(&mut self) {}
}

/// The active plugin set of one connection.
#[derive(Default)]
pub(crate) struct PluginHost {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds plugins, skipping any whose name is already active. Each added
    /// plugin is initialized and given the registry to hook into.
    pub(crate) fn add(
        &mut self,
        plugins: Vec<Box<dyn Plugin>>,
        ctx: &HookContext,
        hooks: &mut HookRegistry,
    ) {
        for mut plugin in plugins {
            if self.plugins.iter().any(|p| p.name() == plugin.name()) {
                debug!(plugin = %plugin.name(), "duplicate plugin name, skipping");
                continue;
            }
            plugin.init(ctx);
            plugin.register_hooks(hooks);
            debug!(plugin = %plugin.name(), "plugin added");
            self.plugins.push(plugin);
        }
    }

    /// Removes plugins by name, calling `destroy` on each match.
    pub(crate) fn remove(&mut self, names: &[String]) {
        self.plugins.retain_mut(|plugin| {
            if names.iter().any(|n| n == plugin.name()) {
                plugin.destroy();
                debug!(plugin = %plugin.name(), "plugin removed");
                false
            } else {
                true
            }
        });
    }

    /// Tears down every plugin. Used by connection destroy.
    pub(crate) fn teardown(&mut self) {
        for plugin in &mut self.plugins {
            plugin.destroy();
        }
        self.plugins.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.plugins.len()
    }
}
