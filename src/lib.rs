//! Bluetooth push-to-talk accessory service.
//!
//! Keeps a connection to a paired PTT accessory, decodes its AT-style
//! control stream into button events and publishes connection state and
//! button events to subscribers.

pub mod accessory;
pub mod bluetooth;
pub mod config;
pub mod dbus;
pub mod error;
pub mod event;

pub use crate::{
   accessory::{
      device::{AccessoryDevice, ConnectionState},
      parser::decode,
      protocol::{ButtonEvent, ButtonId},
      recognition::DeviceMatcher,
   },
   bluetooth::{
      manager::{AccessoryManager, DeviceSignal, SignalPort, SignalSource},
      rfcomm::{Channel, Connector, connect},
   },
   error::{PttError, Result},
   event::{ButtonEvents, EventBus},
};
