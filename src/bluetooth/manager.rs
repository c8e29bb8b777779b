//! Connection lifecycle for the PTT accessory.
//!
//! This module owns the current accessory association, derives the
//! connection state from it and starts or stops the read loop to match.
//! All state lives in a single actor task, so signals may arrive from any
//! thread and are applied strictly in order.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::{
   select,
   sync::{mpsc, oneshot, watch},
   task::JoinHandle,
};

use crate::{
   accessory::{
      device::{AccessoryDevice, ConnectionState},
      recognition::DeviceMatcher,
   },
   bluetooth::{
      reader::{LoopExit, ReadLoop},
      rfcomm::Connector,
   },
   config::Config,
   error::{PttError, Result},
   event::{ButtonEvents, EventBus},
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 64;

// === Signals ===

/// Attach/detach notification from the device-identity source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSignal {
   Attached(AccessoryDevice),
   Detached(AccessoryDevice),
}

/// Producer of device signals, e.g. a BlueZ adapter monitor.
///
/// The manager owns the returned task and aborts it on dispose.
pub trait SignalSource: Send + 'static {
   fn start(self, port: SignalPort) -> JoinHandle<()>;
}

/// Entry point through which device signals reach the manager.
///
/// Signals for devices the matcher rejects are dropped here. This type is
/// cheaply cloneable.
#[derive(Debug, Clone)]
pub struct SignalPort {
   inbox: mpsc::Sender<ManagerCommand>,
   matcher: Arc<DeviceMatcher>,
}

impl SignalPort {
   /// Delivers a signal and waits until the manager has applied it.
   ///
   /// Returns `false` if the device is not the accessory.
   pub async fn deliver(&self, signal: DeviceSignal) -> Result<bool> {
      let Some(device) = self.filter(&signal) else {
         return Ok(false);
      };
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ManagerCommand::SetDevice(device, Some(tx)))
         .await
         .map_err(|_| PttError::ManagerShutdown)?;
      rx.await.map_err(|_| PttError::ManagerShutdown)?;
      Ok(true)
   }

   pub async fn attached(&self, device: AccessoryDevice) -> Result<bool> {
      self.deliver(DeviceSignal::Attached(device)).await
   }

   pub async fn detached(&self, device: AccessoryDevice) -> Result<bool> {
      self.deliver(DeviceSignal::Detached(device)).await
   }

   /// Queues a signal without waiting; usable from threads outside the
   /// runtime.
   pub fn notify(&self, signal: DeviceSignal) -> Result<bool> {
      let Some(device) = self.filter(&signal) else {
         return Ok(false);
      };
      self
         .inbox
         .try_send(ManagerCommand::SetDevice(device, None))
         .map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
               warn!("Manager inbox full, dropping {signal:?}");
               PttError::InboxFull
            },
            mpsc::error::TrySendError::Closed(_) => PttError::ManagerShutdown,
         })?;
      Ok(true)
   }

   /// Maps a signal to the device to associate, or `None` if it is not
   /// for the accessory.
   fn filter(&self, signal: &DeviceSignal) -> Option<Option<AccessoryDevice>> {
      let (DeviceSignal::Attached(device) | DeviceSignal::Detached(device)) = signal;
      if !self.matcher.matches(device) {
         debug!("Ignoring signal for {device}");
         return None;
      }
      match signal {
         DeviceSignal::Attached(device) => Some(Some(device.clone())),
         DeviceSignal::Detached(_) => Some(None),
      }
   }
}

// === Commands ===

#[derive(Debug)]
enum ManagerCommand {
   SetDevice(Option<AccessoryDevice>, Option<oneshot::Sender<()>>),
   AttachSource(JoinHandle<()>),
   Dispose(oneshot::Sender<()>),
}

// === Main Manager ===

/// Manages the connection to a single PTT accessory.
///
/// Owned by its creator, who calls [`AccessoryManager::dispose`] when done.
pub struct AccessoryManager {
   inbox: mpsc::Sender<ManagerCommand>,
   events: EventBus,
   matcher: Arc<DeviceMatcher>,
}

impl AccessoryManager {
   /// Creates the manager and spawns its actor on the current runtime.
   pub fn new<C: Connector>(connector: C, config: &Config) -> Self {
      let matcher = Arc::new(DeviceMatcher::from_config(config));
      let events = EventBus::new(config.event_capacity);
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      tokio::spawn(
         ManagerActor::new(
            Arc::new(connector),
            config.connect_attempts,
            events.clone(),
            command_rx,
         )
         .run(),
      );
      Self {
         inbox: command_tx,
         events,
         matcher,
      }
   }

   /// Associates `device` (or nothing) with the manager.
   ///
   /// Always re-publishes the resulting state. A read loop is started when
   /// none is running; an already running loop is kept.
   pub async fn set_device(&self, device: Option<AccessoryDevice>) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ManagerCommand::SetDevice(device, Some(tx)))
         .await
         .map_err(|_| PttError::ManagerShutdown)?;
      rx.await.map_err(|_| PttError::ManagerShutdown)
   }

   pub fn port(&self) -> SignalPort {
      SignalPort {
         inbox: self.inbox.clone(),
         matcher: self.matcher.clone(),
      }
   }

   /// Starts `source` feeding this manager. It is stopped on dispose.
   pub async fn attach_source<S: SignalSource>(&self, source: S) -> Result<()> {
      let handle = source.start(self.port());
      self
         .inbox
         .send(ManagerCommand::AttachSource(handle))
         .await
         .map_err(|e| {
            if let ManagerCommand::AttachSource(handle) = e.0 {
               handle.abort();
            }
            PttError::ManagerShutdown
         })
   }

   /// Replay-latest stream of connection states.
   pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
      self.events.subscribe_state()
   }

   /// Button events published from now on.
   pub fn button_events(&self) -> ButtonEvents {
      self.events.subscribe_buttons()
   }

   pub fn current_state(&self) -> ConnectionState {
      self.events.current_state()
   }

   pub fn is_connected(&self) -> bool {
      self.current_state().is_connected()
   }

   /// Stops the read loop, releases the channel and detaches the signal
   /// source. Safe to call more than once.
   pub async fn dispose(&self) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      if self.inbox.send(ManagerCommand::Dispose(tx)).await.is_err() {
         debug!("Manager already disposed");
         return Ok(());
      }
      let _ = rx.await;
      Ok(())
   }
}

// === Manager Actor ===

struct ManagerActor<C> {
   connector: Arc<C>,
   connect_attempts: u32,
   events: EventBus,
   command_rx: mpsc::Receiver<ManagerCommand>,
   exit_tx: mpsc::UnboundedSender<(u64, LoopExit)>,
   exit_rx: mpsc::UnboundedReceiver<(u64, LoopExit)>,

   // State
   device: Option<AccessoryDevice>,
   read_loop: Option<ReadLoop>,
   generation: u64,
   source: Option<JoinHandle<()>>,
}

impl<C: Connector> ManagerActor<C> {
   fn new(
      connector: Arc<C>,
      connect_attempts: u32,
      events: EventBus,
      command_rx: mpsc::Receiver<ManagerCommand>,
   ) -> Self {
      let (exit_tx, exit_rx) = mpsc::unbounded_channel();
      Self {
         connector,
         connect_attempts,
         events,
         command_rx,
         exit_tx,
         exit_rx,
         device: None,
         read_loop: None,
         generation: 0,
         source: None,
      }
   }

   async fn run(mut self) {
      info!("Accessory manager starting up");

      let mut disposed = None;
      loop {
         select! {
            cmd = self.command_rx.recv() => {
               let Some(cmd) = cmd else {
                  info!("Accessory manager shutting down");
                  break;
               };
               if let Some(reply) = self.handle_command(cmd).await {
                  disposed = Some(reply);
                  break;
               }
            }
            Some((generation, exit)) = self.exit_rx.recv() => {
               self.handle_loop_exit(generation, exit);
            }
         }
      }

      self.cleanup().await;
      if let Some(reply) = disposed {
         let _ = reply.send(());
      }
   }

   /// Handles one command. Returns the dispose reply once the actor should
   /// stop; it is answered after cleanup.
   async fn handle_command(&mut self, cmd: ManagerCommand) -> Option<oneshot::Sender<()>> {
      match cmd {
         ManagerCommand::SetDevice(device, reply) => {
            self.set_device(device).await;
            if let Some(reply) = reply {
               let _ = reply.send(());
            }
         },
         ManagerCommand::AttachSource(handle) => {
            if let Some(old) = self.source.replace(handle) {
               old.abort();
            }
         },
         ManagerCommand::Dispose(reply) => return Some(reply),
      }
      None
   }

   async fn set_device(&mut self, device: Option<AccessoryDevice>) {
      match (self.device.take(), device) {
         (Some(current), Some(new)) if current != new => {
            info!("Accessory changed from {current} to {new}");
            self.disconnect().await;
            self.connect(new);
         },
         (_, Some(new)) => self.connect(new),
         (_, None) => self.disconnect().await,
      }
   }

   fn connect(&mut self, device: AccessoryDevice) {
      info!("Accessory connected: {device}");
      self.device = Some(device.clone());
      self
         .events
         .publish_state(ConnectionState::Connected(device.clone()));

      if let Some(read_loop) = &self.read_loop
         && !read_loop.is_finished()
      {
         debug!("Read loop already running for {device}");
         return;
      }

      self.generation += 1;
      self.read_loop = Some(ReadLoop::spawn(
         self.generation,
         self.connector.clone(),
         device,
         self.connect_attempts,
         self.events.clone(),
         self.exit_tx.clone(),
      ));
   }

   async fn disconnect(&mut self) {
      self.device = None;
      if let Some(read_loop) = self.read_loop.take() {
         let exit = read_loop.stop().await;
         debug!("Read loop stopped: {exit}");
      }
      info!("Accessory disconnected");
      self.events.publish_state(ConnectionState::Disconnected);
   }

   fn handle_loop_exit(&mut self, generation: u64, exit: LoopExit) {
      if !self
         .read_loop
         .as_ref()
         .is_some_and(|l| l.generation() == generation)
      {
         debug!("Ignoring exit of superseded read loop {generation}: {exit}");
         return;
      }

      self.read_loop = None;
      if let Some(device) = self.device.take() {
         warn!("Lost accessory {device} ({exit}); waiting for it to attach again");
      }
      self.events.publish_state(ConnectionState::Disconnected);
   }

   async fn cleanup(&mut self) {
      info!("Cleaning up accessory manager");

      if let Some(source) = self.source.take() {
         source.abort();
      }
      if self.device.is_some() || self.read_loop.is_some() {
         self.disconnect().await;
      }
   }
}
