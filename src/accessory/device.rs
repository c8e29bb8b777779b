//! Accessory device handle and connection state.

use std::fmt;

use bluer::Address;
use serde_json::json;
use smol_str::SmolStr;

/// A Bluetooth device observed by the signal source.
///
/// Immutable once observed; cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessoryDevice {
   address: Address,
   name: SmolStr,
}

impl AccessoryDevice {
   pub fn new(address: Address, name: impl Into<SmolStr>) -> Self {
      Self {
         address,
         name: name.into(),
      }
   }

   pub const fn address(&self) -> Address {
      self.address
   }

   pub fn name(&self) -> &str {
      &self.name
   }
}

impl fmt::Display for AccessoryDevice {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{} ({})", self.name, self.address)
   }
}

/// Connection state of the accessory, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
   #[default]
   Disconnected,
   Connected(AccessoryDevice),
}

impl ConnectionState {
   pub const fn is_connected(&self) -> bool {
      matches!(self, Self::Connected(_))
   }

   pub const fn device(&self) -> Option<&AccessoryDevice> {
      match self {
         Self::Connected(device) => Some(device),
         Self::Disconnected => None,
      }
   }

   pub fn to_json(&self) -> serde_json::Value {
      match self {
         Self::Connected(device) => json!({
            "connected": true,
            "name": device.name(),
            "address": device.address().to_string(),
         }),
         Self::Disconnected => json!({
            "connected": false,
            "name": null,
            "address": null,
         }),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_state_device() {
      let device = AccessoryDevice::new(Address::new([1, 2, 3, 4, 5, 6]), "APTT-100");
      assert_eq!(device.to_string(), "APTT-100 (01:02:03:04:05:06)");

      let state = ConnectionState::Connected(device.clone());
      assert!(state.is_connected());
      assert_eq!(state.device(), Some(&device));

      let state = ConnectionState::default();
      assert!(!state.is_connected());
      assert_eq!(state.device(), None);
   }

   #[test]
   fn test_state_json() {
      let device = AccessoryDevice::new(Address::new([1, 2, 3, 4, 5, 6]), "APTT-100");
      let json = ConnectionState::Connected(device).to_json();
      assert_eq!(json["connected"], true);
      assert_eq!(json["name"], "APTT-100");
      assert_eq!(json["address"], "01:02:03:04:05:06");

      let json = ConnectionState::Disconnected.to_json();
      assert_eq!(json["connected"], false);
      assert!(json["name"].is_null());
   }
}
