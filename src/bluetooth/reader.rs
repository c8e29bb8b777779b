//! Background read loop for an accessory connection.
//!
//! One loop runs per connection. It opens the channel, then reads chunks of
//! up to [`CHUNK_SIZE`] bytes, decodes each one and publishes the resulting
//! button events. Read errors and end-of-stream end the loop; it never
//! reconnects on its own.

use std::{fmt, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
   io::AsyncReadExt,
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
   time,
};

use crate::{
   accessory::{device::AccessoryDevice, parser, protocol::CHUNK_SIZE},
   bluetooth::rfcomm::{self, Channel, Connector},
   event::EventBus,
};

/// Grace period for a loop to finish after being asked to stop
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
   /// Stop was requested by the owner.
   Stopped,
   /// The remote end closed the channel.
   Closed,
   ReadFailed,
   /// The channel could not be opened.
   ConnectFailed,
}

impl fmt::Display for LoopExit {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         Self::Stopped => "stopped",
         Self::Closed => "channel closed",
         Self::ReadFailed => "read failed",
         Self::ConnectFailed => "connection failed",
      })
   }
}

/// Exit notification sent by loops that end without being stopped.
pub type ExitSender = mpsc::UnboundedSender<(u64, LoopExit)>;

/// Handle to a running read loop.
///
/// Dropping the handle without calling [`ReadLoop::stop`] also signals
/// the loop to stop, but does not wait for it.
#[derive(Debug)]
pub struct ReadLoop {
   generation: u64,
   device: AccessoryDevice,
   stop: Option<oneshot::Sender<()>>,
   handle: JoinHandle<LoopExit>,
}

impl ReadLoop {
   /// Spawns a loop that connects to `device` and starts reading.
   ///
   /// If the loop ends on its own, `(generation, exit)` is sent on `exits`.
   pub fn spawn<C: Connector>(
      generation: u64,
      connector: Arc<C>,
      device: AccessoryDevice,
      connect_attempts: u32,
      events: EventBus,
      exits: ExitSender,
   ) -> Self {
      let (stop_tx, stop_rx) = oneshot::channel();
      let handle = tokio::spawn({
         let device = device.clone();
         async move {
            let exit = run(&*connector, &device, connect_attempts, &events, stop_rx).await;
            if exit != LoopExit::Stopped {
               let _ = exits.send((generation, exit));
            }
            exit
         }
      });
      Self {
         generation,
         device,
         stop: Some(stop_tx),
         handle,
      }
   }

   pub const fn generation(&self) -> u64 {
      self.generation
   }

   pub fn is_finished(&self) -> bool {
      self.handle.is_finished()
   }

   /// Stops the loop and waits for it to release its channel.
   pub async fn stop(mut self) -> LoopExit {
      if let Some(stop) = self.stop.take() {
         let _ = stop.send(());
      }
      match time::timeout(STOP_TIMEOUT, &mut self.handle).await {
         Ok(Ok(exit)) => exit,
         Ok(Err(e)) => {
            warn!("Read loop for {} panicked: {e}", self.device);
            LoopExit::ReadFailed
         },
         Err(_) => {
            warn!("Read loop for {} did not stop in time, aborting", self.device);
            self.handle.abort();
            let _ = (&mut self.handle).await;
            LoopExit::Stopped
         },
      }
   }
}

async fn run<C: Connector>(
   connector: &C,
   device: &AccessoryDevice,
   connect_attempts: u32,
   events: &EventBus,
   mut stop: oneshot::Receiver<()>,
) -> LoopExit {
   let connected = select! {
      biased;
      _ = &mut stop => return LoopExit::Stopped,
      res = rfcomm::connect(connector, device, connect_attempts) => res,
   };
   let channel = match connected {
      Ok(channel) => channel,
      Err(e) => {
         warn!("Giving up on {device}: {e}");
         return LoopExit::ConnectFailed;
      },
   };

   info!("Read loop started for {device}");
   let exit = read_chunks(channel, device, events, &mut stop).await;
   info!("Read loop for {device} terminating: {exit}");
   exit
}

async fn read_chunks<T: Channel>(
   mut channel: T,
   device: &AccessoryDevice,
   events: &EventBus,
   stop: &mut oneshot::Receiver<()>,
) -> LoopExit {
   let mut buf = [0u8; CHUNK_SIZE];
   let exit = loop {
      let read = select! {
         biased;
         _ = &mut *stop => break LoopExit::Stopped,
         res = channel.read(&mut buf) => res,
      };
      match read {
         Ok(0) => {
            info!("{device} closed the channel");
            break LoopExit::Closed;
         },
         Ok(n) => handle_chunk(&buf[..n], device, events),
         Err(e) => {
            warn!("Error reading from {device}: {e}");
            break LoopExit::ReadFailed;
         },
      }
   };
   debug!("Closing channel to {device}");
   drop(channel);
   exit
}

fn handle_chunk(chunk: &[u8], device: &AccessoryDevice, events: &EventBus) {
   debug!("← {}: {}", device.address(), hex::encode(chunk));
   match parser::decode(chunk) {
      Some(event) => {
         debug!("{device}: {event}");
         events.publish_button(event);
      },
      None => {
         warn!(
            "Unknown chunk from {device}: {:?}",
            parser::describe(chunk)
         );
      },
   }
}
