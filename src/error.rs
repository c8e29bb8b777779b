//! Error types for the PTT accessory service.
//!
//! This module defines all error types that can occur during the operation
//! of the service, including Bluetooth, D-Bus, I/O and configuration errors.
//! Read and decode failures inside the read loop never reach this type's
//! callers; they are logged and absorbed where they happen.

use thiserror::Error;

/// Main error type for the accessory service.
#[derive(Error, Debug)]
pub enum PttError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   /// Every connection attempt failed; `source` is the last failure seen.
   #[error("Connection failed after {attempts} attempt(s): {source}")]
   ConnectionFailed {
      attempts: u32,
      #[source]
      source: Box<PttError>,
   },

   #[error("Connection closed")]
   ConnectionClosed,

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Manager has been shut down")]
   ManagerShutdown,

   #[error("Manager inbox is full")]
   InboxFull,

   #[error("Adapter not found")]
   AdapterNotFound,
}

/// Convenience type alias for Results with `PttError`.
pub type Result<T> = std::result::Result<T, PttError>;
