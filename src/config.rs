//! Configuration management for the accessory service.
//!
//! This module handles loading and saving configuration from disk,
//! including the device-name marker and connection parameters.

use std::{
   env, fs,
   path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
   accessory::recognition::DEFAULT_MARKER,
   bluetooth::rfcomm::DEFAULT_CONNECT_ATTEMPTS,
   error::{PttError, Result},
   event::DEFAULT_EVENT_CAPACITY,
};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   /// Substring a device name must contain to be treated as the accessory.
   #[serde(default = "default_device_marker")]
   pub device_marker: String,

   #[serde(default = "default_connect_attempts")]
   pub connect_attempts: u32,

   /// Size of the button event ring shared by subscribers.
   #[serde(default = "default_event_capacity")]
   pub event_capacity: usize,

   /// Seconds between BlueZ connection scans.
   #[serde(default = "default_poll_interval")]
   pub poll_interval: u64,

   /// BlueZ adapter name; the default adapter is used when unset.
   #[serde(default)]
   pub adapter: Option<String>,

   #[serde(default)]
   pub known_devices: Vec<KnownDevice>,
}

/// A device recognized by address, regardless of its advertised name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KnownDevice {
   pub address: String,
   pub name: String,
}

fn default_device_marker() -> String {
   DEFAULT_MARKER.to_string()
}

const fn default_connect_attempts() -> u32 {
   DEFAULT_CONNECT_ATTEMPTS
}

const fn default_event_capacity() -> usize {
   DEFAULT_EVENT_CAPACITY
}

const fn default_poll_interval() -> u64 {
   5
}

impl Default for Config {
   fn default() -> Self {
      Self {
         device_marker: default_device_marker(),
         connect_attempts: default_connect_attempts(),
         event_capacity: default_event_capacity(),
         poll_interval: default_poll_interval(),
         adapter: None,
         known_devices: vec![],
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(aptt_home) = env::var("APTT_HOME") {
         PathBuf::from(aptt_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(PttError::ConfigDirNotFound);
      };

      Ok(config_dir.join("apttd").join("config.toml"))
   }
}
