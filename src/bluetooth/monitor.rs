//! BlueZ-backed device signal source.
//!
//! Watches one adapter for device additions and removals and periodically
//! scans connection status, since bluer does not report connects and
//! disconnects as adapter events. Connected devices are reported as
//! attached, disconnected or removed ones as detached.

use std::{collections::HashMap, time::Duration};

use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::{
   select,
   task::JoinHandle,
   time::{self, MissedTickBehavior},
};

use crate::{
   accessory::device::AccessoryDevice,
   bluetooth::manager::{SignalPort, SignalSource},
   config::Config,
   error::{PttError, Result},
};

pub struct BluezMonitor {
   session: Session,
   adapter: Option<String>,
   poll_interval: Duration,
}

impl BluezMonitor {
   pub fn new(session: Session, config: &Config) -> Self {
      Self {
         session,
         adapter: config.adapter.clone(),
         poll_interval: Duration::from_secs(config.poll_interval.max(1)),
      }
   }

   async fn adapter(&self) -> Result<Adapter> {
      match &self.adapter {
         Some(name) => Ok(self.session.adapter(name)?),
         None => Ok(self.session.default_adapter().await?),
      }
   }

   async fn run(self, port: SignalPort) -> Result<()> {
      let adapter = self.adapter().await?;
      info!("Monitoring adapter {}", adapter.name());

      let events = adapter.events().await?;
      tokio::pin!(events);

      let mut scan_interval = time::interval(self.poll_interval);
      scan_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

      let mut tracker = Tracker {
         adapter,
         port,
         attached: HashMap::new(),
      };

      loop {
         let res = select! {
            _ = scan_interval.tick() => tracker.scan().await,
            event = events.next() => match event {
               Some(AdapterEvent::DeviceAdded(addr)) => {
                  debug!("Device added: {addr}");
                  tracker.check_device(addr).await
               },
               Some(AdapterEvent::DeviceRemoved(addr)) => {
                  debug!("Device removed: {addr}");
                  tracker.detach(addr).await
               },
               Some(_) => Ok(()),
               None => {
                  warn!("Adapter {} went away", tracker.adapter.name());
                  return Err(PttError::AdapterNotFound);
               },
            },
         };
         match res {
            Ok(()) => {},
            Err(PttError::ManagerShutdown) => {
               debug!("Manager gone, monitor exiting");
               return Ok(());
            },
            Err(e) => warn!("Device scan failed: {e}"),
         }
      }
   }
}

impl SignalSource for BluezMonitor {
   fn start(self, port: SignalPort) -> JoinHandle<()> {
      tokio::spawn(async move {
         if let Err(e) = self.run(port).await {
            error!("BlueZ monitor stopped: {e}");
         }
      })
   }
}

/// Tracks which accessories have been reported as attached.
struct Tracker {
   adapter: Adapter,
   port: SignalPort,
   attached: HashMap<Address, AccessoryDevice>,
}

impl Tracker {
   async fn scan(&mut self) -> Result<()> {
      let addresses = self.adapter.device_addresses().await?;
      for &addr in &addresses {
         self.check_device(addr).await?;
      }

      let gone: Vec<Address> = self
         .attached
         .keys()
         .filter(|addr| !addresses.contains(*addr))
         .copied()
         .collect();
      for addr in gone {
         self.detach(addr).await?;
      }
      Ok(())
   }

   async fn check_device(&mut self, addr: Address) -> Result<()> {
      let device = self.adapter.device(addr)?;
      let connected = device.is_connected().await.unwrap_or(false);

      match (self.attached.contains_key(&addr), connected) {
         (false, true) => {
            let name = match device.name().await {
               Ok(Some(name)) => name,
               _ => device.alias().await.unwrap_or_else(|_| addr.to_string()),
            };
            let accessory = AccessoryDevice::new(addr, name);
            if self.port.attached(accessory.clone()).await? {
               info!("Accessory attached: {accessory}");
               self.attached.insert(addr, accessory);
            }
         },
         (true, false) => self.detach(addr).await?,
         _ => {},
      }
      Ok(())
   }

   async fn detach(&mut self, addr: Address) -> Result<()> {
      if let Some(accessory) = self.attached.remove(&addr) {
         info!("Accessory detached: {accessory}");
         self.port.detached(accessory).await?;
      }
      Ok(())
   }
}
