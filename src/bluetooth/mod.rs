//! Bluetooth communication layer for the PTT accessory.
//!
//! This module provides RFCOMM channel establishment, the per-connection
//! read loop, the connection lifecycle manager and the BlueZ device monitor.

pub mod manager;
pub mod monitor;
pub mod reader;
pub mod rfcomm;
