//! Expansion of the initial presets and plugins into the descriptor store.
//!
//! Presets drain first. A preset's nested presets go to the front of the
//! preset queue, so they expand before anything queued after it; its plugins go
//! to the back of the plugin queue. Once no preset is left, the initial plugins
//! are appended and the plugin queue drains front to back.

use std::collections::VecDeque;

use tracing::{Instrument, debug, debug_span};

use super::Service;
use crate::api::PluginApi;
use crate::error::ServiceError;
use crate::plugin::{ApplyOutput, PluginDescriptor, PluginKind, PluginRef, path_to_descriptor};
use crate::stage::ServiceStage;

/// Pending descriptors. Only exists while `init()` expands.
#[derive(Default)]
pub(crate) struct ExpansionQueues {
    presets: VecDeque<PluginDescriptor>,
    plugins: VecDeque<PluginDescriptor>,
}

impl Service {
    pub(super) async fn init_presets_and_plugins(&self) -> Result<(), ServiceError> {
        *self.state.queues.lock() = Some(ExpansionQueues::default());
        let result = self.drain_queues().await;
        *self.state.queues.lock() = None;
        result
    }

    async fn drain_queues(&self) -> Result<(), ServiceError> {
        self.set_stage(ServiceStage::InitPresets);
        let presets = core::mem::take(&mut *self.state.initial_presets.lock());
        self.queue_presets_front(presets);
        while let Some(preset) = self.pop(PluginKind::Preset) {
            self.init_descriptor(preset).await?;
        }

        self.set_stage(ServiceStage::InitPlugins);
        let plugins = core::mem::take(&mut *self.state.initial_plugins.lock());
        self.queue_plugins_back(plugins);
        while let Some(plugin) = self.pop(PluginKind::Plugin) {
            self.init_descriptor(plugin).await?;
        }

        debug!(registered = self.state.plugins.read().len(), "expanded presets and plugins");
        Ok(())
    }

    /// Registers a descriptor, runs its entry function and handles the output.
    async fn init_descriptor(&self, descriptor: PluginDescriptor) -> Result<(), ServiceError> {
        let kind = descriptor.kind;
        let apply = descriptor.apply.clone();
        let span = debug_span!("apply", kind = %kind, id = %descriptor.id);

        let api = self.register_plugin(descriptor)?;
        let output = apply(api.clone())
            .instrument(span)
            .await
            .map_err(|source| ServiceError::Apply {
                kind,
                id: api.id(),
                source,
            })?;

        self.handle_output(kind, &api, output)
    }

    fn handle_output(
        &self,
        kind: PluginKind,
        api: &PluginApi,
        output: ApplyOutput,
    ) -> Result<(), ServiceError> {
        let ApplyOutput {
            presets,
            plugins,
            config,
        } = output;

        if kind == PluginKind::Preset {
            let presets = self.resolve_refs(PluginKind::Preset, presets)?;
            self.queue_presets_front(presets);
            let plugins = self.resolve_refs(PluginKind::Plugin, plugins)?;
            self.queue_plugins_back(plugins);
        } else if !presets.is_empty() || !plugins.is_empty() {
            debug!(plugin = %api.id(), "ignored presets and plugins returned by a plugin");
        }

        if !config.is_empty() {
            let mut fragments = self.state.default_fragments.lock();
            for (key, value) in config {
                fragments.insert(key, value);
            }
        }
        Ok(())
    }

    /// Adds a descriptor to the store and returns a facade bound to it.
    fn register_plugin(&self, descriptor: PluginDescriptor) -> Result<PluginApi, ServiceError> {
        let (id, key) = (descriptor.id.clone(), descriptor.key.clone());
        {
            let mut plugins = self.state.plugins.write();
            if let Some(existing) = plugins.get(&id) {
                return Err(ServiceError::DuplicatePlugin {
                    kind: descriptor.kind,
                    id,
                    existing: existing.path.clone(),
                    conflicting: descriptor.path,
                });
            }
            debug!(kind = %descriptor.kind, id = %id, path = %descriptor.path, "registered");
            plugins.insert(id.clone(), descriptor);
        }
        Ok(PluginApi::new(self.clone(), &id, &key))
    }

    /// Turns references into descriptors of `kind`.
    pub(crate) fn resolve_refs<I>(
        &self,
        kind: PluginKind,
        references: I,
    ) -> Result<Vec<PluginDescriptor>, ServiceError>
    where
        I: IntoIterator<Item = PluginRef>,
    {
        references
            .into_iter()
            .map(|reference| match reference {
                PluginRef::Path(path) => {
                    path_to_descriptor(kind, &path, &self.state.cwd, self.state.loader.as_ref())
                }
                PluginRef::Descriptor(descriptor) => Ok(descriptor.into_kind(kind)),
            })
            .collect()
    }

    /// Puts presets at the front of the preset queue, keeping their order.
    pub(crate) fn queue_presets_front(&self, presets: Vec<PluginDescriptor>) {
        if let Some(queues) = self.state.queues.lock().as_mut() {
            for preset in presets.into_iter().rev() {
                queues.presets.push_front(preset);
            }
        }
    }

    /// Puts plugins at the front of the plugin queue, keeping their order.
    pub(crate) fn queue_plugins_front(&self, plugins: Vec<PluginDescriptor>) {
        if let Some(queues) = self.state.queues.lock().as_mut() {
            for plugin in plugins.into_iter().rev() {
                queues.plugins.push_front(plugin);
            }
        }
    }

    /// Appends plugins to the plugin queue.
    pub(crate) fn queue_plugins_back(&self, plugins: Vec<PluginDescriptor>) {
        if let Some(queues) = self.state.queues.lock().as_mut() {
            queues.plugins.extend(plugins);
        }
    }

    fn pop(&self, kind: PluginKind) -> Option<PluginDescriptor> {
        let mut queues = self.state.queues.lock();
        let queues = queues.as_mut()?;
        match kind {
            PluginKind::Preset => queues.presets.pop_front(),
            PluginKind::Plugin => queues.plugins.pop_front(),
        }
    }
}
