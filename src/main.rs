//! PTT accessory D-Bus service
//!
//! Connects to a paired Bluetooth push-to-talk accessory, decodes its
//! button presses and publishes them on the session bus.

use std::sync::Arc;

use bluer::Session;
use log::info;
use tokio::signal;
use zbus::connection;

use apttd::{
   AccessoryManager,
   bluetooth::{monitor::BluezMonitor, rfcomm::RfcommConnector},
   config::Config,
   dbus::{self, AccessoryService, OBJECT_PATH, SERVICE_NAME},
   error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting apttd...");

   // Load configuration
   let config = Config::load()?;
   info!(
      "Loaded configuration: marker {:?}, {} known devices",
      config.device_marker,
      config.known_devices.len()
   );

   let session = Session::new().await?;

   // Create the accessory manager and feed it adapter signals
   let connector = RfcommConnector::new(session.clone(), config.adapter.clone());
   let manager = Arc::new(AccessoryManager::new(connector, &config));
   manager
      .attach_source(BluezMonitor::new(session, &config))
      .await?;

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name(SERVICE_NAME)?
      .serve_at(OBJECT_PATH, AccessoryService::new(manager.clone()))?
      .build()
      .await?;

   info!("apttd D-Bus service started at {SERVICE_NAME}");

   let dispatcher = dbus::spawn_dispatcher(&connection, &manager).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down apttd...");

   dispatcher.abort();
   manager.dispose().await?;

   Ok(())
}
