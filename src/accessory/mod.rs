//! PTT accessory model and wire protocol.
//!
//! This module contains everything specific to the accessory itself:
//! the device handle, name recognition, and the control-token protocol.

pub mod device;
pub mod parser;
pub mod protocol;
pub mod recognition;
