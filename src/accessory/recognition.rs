//! Device recognition logic for PTT accessories.
//!
//! An accessory is recognized by a marker substring in its name. The match
//! is case-sensitive. Addresses listed as known devices in the
//! configuration are accepted regardless of name.

use std::str::FromStr;

use bluer::Address;
use log::{debug, warn};

use crate::{accessory::device::AccessoryDevice, config::Config};

/// Marker the accessory firmware puts in its advertised name.
pub const DEFAULT_MARKER: &str = "APTT";

#[derive(Debug, Clone)]
pub struct DeviceMatcher {
   marker: String,
   known: Vec<Address>,
}

impl Default for DeviceMatcher {
   fn default() -> Self {
      Self::new(DEFAULT_MARKER)
   }
}

impl DeviceMatcher {
   pub fn new(marker: impl Into<String>) -> Self {
      Self {
         marker: marker.into(),
         known: Vec::new(),
      }
   }

   pub fn from_config(config: &Config) -> Self {
      let known = config
         .known_devices
         .iter()
         .filter_map(|d| match Address::from_str(&d.address) {
            Ok(addr) => Some(addr),
            Err(e) => {
               warn!("Ignoring known device {} ({}): {e}", d.name, d.address);
               None
            },
         })
         .collect();
      Self {
         marker: config.device_marker.clone(),
         known,
      }
   }

   pub fn matches(&self, device: &AccessoryDevice) -> bool {
      if self.known.contains(&device.address()) {
         debug!("Accessory recognized by address: {device}");
         return true;
      }
      self.matches_name(device.name())
   }

   pub fn matches_name(&self, name: &str) -> bool {
      !self.marker.is_empty() && name.contains(self.marker.as_str())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::config::KnownDevice;

   fn device(name: &str) -> AccessoryDevice {
      AccessoryDevice::new(Address::new([0, 1, 2, 3, 4, 5]), name)
   }

   #[test]
   fn test_marker_substring() {
      let matcher = DeviceMatcher::default();
      assert!(matcher.matches(&device("APTT")));
      assert!(matcher.matches(&device("AINA APTT-2 Voice Responder")));
      assert!(!matcher.matches(&device("Jabra Talk 25")));
      assert!(!matcher.matches(&device("")));
   }

   #[test]
   fn test_match_is_case_sensitive() {
      let matcher = DeviceMatcher::default();
      assert!(!matcher.matches(&device("aptt")));
      assert!(!matcher.matches(&device("Aptt Voice Responder")));
   }

   #[test]
   fn test_empty_marker_matches_nothing() {
      let matcher = DeviceMatcher::new("");
      assert!(!matcher.matches(&device("APTT")));
   }

   #[test]
   fn test_known_address_overrides_name() {
      let config = Config {
         known_devices: vec![
            KnownDevice {
               address: "00:01:02:03:04:05".into(),
               name: "Renamed accessory".into(),
            },
            KnownDevice {
               address: "not an address".into(),
               name: "Broken".into(),
            },
         ],
         ..Config::default()
      };
      let matcher = DeviceMatcher::from_config(&config);
      assert!(matcher.matches(&device("Renamed accessory")));
      assert!(!matcher.matches(&AccessoryDevice::new(
         Address::new([9, 9, 9, 9, 9, 9]),
         "Renamed accessory"
      )));
   }
}
