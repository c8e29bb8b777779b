//! D-Bus surface of the accessory service.
//!
//! Exposes the current connection state and forwards the manager's state
//! and button streams as signals.

use std::sync::Arc;

use log::{debug, warn};
use tokio::{select, task::JoinHandle};
use zbus::{Connection, interface, object_server::{InterfaceRef, SignalEmitter}};

use crate::{
   accessory::device::ConnectionState, bluetooth::manager::AccessoryManager, error::Result,
};

pub const SERVICE_NAME: &str = "org.aptt";
pub const OBJECT_PATH: &str = "/org/aptt/accessory";

pub struct AccessoryService {
   manager: Arc<AccessoryManager>,
}

impl AccessoryService {
   pub const fn new(manager: Arc<AccessoryManager>) -> Self {
      Self { manager }
   }
}

#[interface(name = "org.aptt.Accessory")]
impl AccessoryService {
   async fn get_state(&self) -> zbus::fdo::Result<String> {
      Ok(self.manager.current_state().to_json().to_string())
   }

   // Signals
   #[zbus(signal)]
   pub async fn connection_changed(
      emitter: &SignalEmitter<'_>,
      connected: bool,
      name: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn button_event(
      emitter: &SignalEmitter<'_>,
      button: &str,
      pressed: bool,
   ) -> zbus::Result<()>;

   #[zbus(property)]
   async fn connected(&self) -> bool {
      self.manager.is_connected()
   }
}

async fn dispatch_state(
   iface: &InterfaceRef<AccessoryService>,
   state: &ConnectionState,
) -> Result<()> {
   let name = state.device().map_or("", |d| d.name());
   iface.connection_changed(state.is_connected(), name).await?;
   iface
      .get()
      .await
      .connected_changed(iface.signal_emitter())
      .await?;
   Ok(())
}

/// Spawns the task forwarding manager events to D-Bus signals.
pub async fn spawn_dispatcher(
   connection: &Connection,
   manager: &AccessoryManager,
) -> Result<JoinHandle<()>> {
   let iface = connection
      .object_server()
      .interface::<_, AccessoryService>(OBJECT_PATH)
      .await?;
   let mut states = manager.connection_state();
   let mut buttons = manager.button_events();

   Ok(tokio::spawn(async move {
      loop {
         select! {
            changed = states.changed() => {
               if changed.is_err() {
                  break;
               }
               let state = states.borrow_and_update().clone();
               if let Err(e) = dispatch_state(&iface, &state).await {
                  warn!("Error dispatching state: {e}");
               }
            }
            event = buttons.recv() => {
               let Some(event) = event else {
                  break;
               };
               if let Err(e) = iface.button_event(event.button.to_str(), event.pressed).await {
                  warn!("Error dispatching button event: {e}");
               }
            }
         }
      }
      debug!("Event dispatcher finished");
   }))
}
