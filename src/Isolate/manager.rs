use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::config::IsolateManagerConfig;
use super::lifecycle::{LifecycleCommand, LIFECYCLE_MESSAGE_TYPE};
use super::record::{IsolateRecord, IsolateState, IsolateTable};
use crate::error::{HostError, Result};
use crate::Core::process::ProcessSpawner;
use crate::Messaging::{Message, MessagingService, Registration};

/// Execution model of the application an isolate hosts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppModel {
    Main,
    Midlet,
    Xlet,
}

impl AppModel {
    pub fn identifier(&self) -> &'static str {
        match self {
            AppModel::Main => "main",
            AppModel::Midlet => "midlet",
            AppModel::Xlet => "xlet",
        }
    }
}

impl fmt::Display for AppModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Lifecycle view of one isolate.
#[derive(Clone)]
pub struct IsolateProxy {
    pub(crate) record: Arc<IsolateRecord>,
}

impl IsolateProxy {
    pub fn pid(&self) -> u32 {
        self.record.pid()
    }

    pub fn state(&self) -> IsolateState {
        self.record.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() != IsolateState::Destroyed
    }

    /// Block until the isolate reaches `state` or a later one.
    pub fn wait_for_state(&self, state: IsolateState, timeout: Duration) -> Result<IsolateState> {
        self.record.wait_for(state, timeout)
    }
}

/// Spawns isolates and tracks them through their lifecycle notifications.
///
/// A handler on [`LIFECYCLE_MESSAGE_TYPE`] is held for the manager's whole
/// lifetime; it advances records on "initialized" and drops them on
/// "destroyed".
pub struct IsolateManager {
    pub(crate) config: IsolateManagerConfig,
    spawner: Arc<dyn ProcessSpawner>,
    messaging: Arc<MessagingService>,
    pub(crate) table: Arc<IsolateTable>,
    registration: Registration,
}

impl IsolateManager {
    pub fn new(
        config: IsolateManagerConfig,
        spawner: Arc<dyn ProcessSpawner>,
        messaging: Arc<MessagingService>,
    ) -> Result<Self> {
        let table = Arc::new(IsolateTable::new());
        let handler_table = table.clone();
        let registration = messaging.message_dispatcher().register_handler(
            LIFECYCLE_MESSAGE_TYPE,
            move |mut message: Message| handle_lifecycle(&handler_table, &mut message),
        )?;
        Ok(Self {
            config,
            spawner,
            messaging,
            table,
            registration,
        })
    }

    pub fn messaging(&self) -> &Arc<MessagingService> {
        &self.messaging
    }

    pub fn own_process_id(&self) -> u32 {
        self.spawner.own_process_id()
    }

    /// Argument vector for a new isolate: default VM args, caller args, the
    /// app model, then the runtime properties file if one is configured.
    pub fn build_args(&self, app_model: AppModel, vm_args: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(self.config.default_vm_args.len() + vm_args.len() + 2);
        args.extend(self.config.default_vm_args.iter().cloned());
        args.extend(vm_args.iter().cloned());
        args.push(format!("--app-model={}", app_model.identifier()));
        if let Some(path) = &self.config.runtime_properties {
            args.push(format!("--runtime-properties={}", path.display()));
        }
        args
    }

    /// Spawn an isolate and wait until it reports itself initialized.
    ///
    /// # Returns
    /// * `Ok(proxy)` once the isolate is `INITIALIZED` and any handshake ran
    /// * `Err(HostError::ProcessSpawnFailure)` if the process could not be created
    /// * `Err(HostError::TimedOut)` if it is alive but did not initialize in time;
    ///   its record stays in the table to be reconciled later
    /// * `Err(HostError::IsolateDestroyed)` if it died before initializing
    pub fn new_isolate(&self, app_model: AppModel, vm_args: &[String]) -> Result<IsolateProxy> {
        let args = self.build_args(app_model, vm_args);
        let pid = self
            .spawner
            .create_process(&args)
            .map_err(|e| HostError::ProcessSpawnFailure {
                message: e.to_string(),
            })?;
        tracing::info!(pid, %app_model, "isolate spawned");

        // the lifecycle handler may already have created this record, or
        // seen the isolate die
        let Some(record) = self.table.claim(pid) else {
            tracing::warn!(pid, "isolate reported destroyed before spawn returned");
            return Err(HostError::IsolateDestroyed { pid });
        };
        let proxy = IsolateProxy { record };

        match proxy.wait_for_state(IsolateState::Initialized, self.config.init_timeout) {
            Ok(IsolateState::Destroyed) => {
                self.table.destroy(pid);
                return Err(HostError::IsolateDestroyed { pid });
            }
            Ok(_) => {}
            Err(e) => {
                if !self.spawner.is_alive(pid) {
                    tracing::warn!(pid, "isolate exited before initializing");
                    self.table.destroy(pid);
                    return Err(HostError::IsolateDestroyed { pid });
                }
                tracing::warn!(pid, timeout = ?self.config.init_timeout, "isolate did not initialize in time");
                return Err(e);
            }
        }

        if let Some(handshake) = &self.config.handshake {
            handshake.handshake(&proxy, &self.messaging)?;
        }
        Ok(proxy)
    }

    pub fn get_isolate(&self, pid: u32) -> Option<IsolateProxy> {
        self.table.get(pid).map(|record| IsolateProxy { record })
    }

    pub fn active_isolates(&self) -> Vec<IsolateProxy> {
        self.table
            .active()
            .into_iter()
            .map(|record| IsolateProxy { record })
            .collect()
    }

    /// Destroy every tracked isolate whose process is gone.
    ///
    /// # Returns
    /// * The pids that were reaped
    pub fn reap_dead(&self) -> Vec<u32> {
        let mut reaped = Vec::new();
        for pid in self.table.pids() {
            if !self.spawner.is_alive(pid) && self.table.destroy(pid).is_some() {
                tracing::info!(pid, "reaped dead isolate");
                reaped.push(pid);
            }
        }
        reaped
    }
}

impl Drop for IsolateManager {
    fn drop(&mut self) {
        if let Err(e) = self
            .messaging
            .message_dispatcher()
            .cancel_registration(&self.registration)
        {
            tracing::debug!(error = %e, "lifecycle handler already cancelled");
        }
    }
}

fn handle_lifecycle(table: &IsolateTable, message: &mut Message) {
    match LifecycleCommand::from_message(message) {
        Ok(LifecycleCommand::Initialized { pid }) => {
            if table.register_or_fetch(pid).advance(IsolateState::Initialized) {
                tracing::info!(pid, "isolate initialized");
            }
        }
        Ok(LifecycleCommand::Destroyed { pid }) => match table.report_destroyed(pid) {
            Some(_) => tracing::info!(pid, "isolate destroyed"),
            None => tracing::debug!(pid, "destroyed notification for unclaimed isolate"),
        },
        Err(e) => tracing::warn!(error = %e, "dropping malformed lifecycle message"),
    }
}
