//! Event distribution for accessory state and button activity.
//!
//! Two streams with different delivery semantics:
//! - connection state replays the latest value to every new subscriber
//!   (`watch`), then delivers changes;
//! - button events are delivered only to receivers subscribed at the time
//!   of publication (`broadcast`).
//!
//! The broadcast ring is bounded and never blocks the publisher: a slow
//! subscriber lags and loses its oldest events instead of stalling the
//! read loop.

use log::{debug, warn};
use tokio::sync::{broadcast, watch};

use crate::accessory::{device::ConnectionState, protocol::ButtonEvent};

/// Default capacity of the button event ring.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
/// Largest button event ring accepted; larger capacities are clamped.
pub const MAX_EVENT_CAPACITY: usize = 1 << 16;

/// Multi-subscriber bus shared by the manager and its read loops.
///
/// This type is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct EventBus {
   state: watch::Sender<ConnectionState>,
   buttons: broadcast::Sender<ButtonEvent>,
}

impl Default for EventBus {
   fn default() -> Self {
      Self::new(DEFAULT_EVENT_CAPACITY)
   }
}

impl EventBus {
   pub fn new(capacity: usize) -> Self {
      let (state, _) = watch::channel(ConnectionState::Disconnected);
      let clamped = capacity.clamp(1, MAX_EVENT_CAPACITY);
      if clamped != capacity {
         warn!("Event capacity {capacity} out of range, using {clamped}");
      }
      let (buttons, _) = broadcast::channel(clamped);
      Self { state, buttons }
   }

   /// Publishes a connection state.
   ///
   /// Subscribers are notified even when the value is unchanged.
   pub fn publish_state(&self, state: ConnectionState) {
      debug!("Publishing state: {state:?}");
      self.state.send_replace(state);
   }

   pub fn publish_button(&self, event: ButtonEvent) {
      // No receivers is not an error: events are fire-only.
      if self.buttons.send(event).is_err() {
         debug!("No subscribers for {event}");
      }
   }

   pub fn current_state(&self) -> ConnectionState {
      self.state.borrow().clone()
   }

   pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
      self.state.subscribe()
   }

   pub fn subscribe_buttons(&self) -> ButtonEvents {
      ButtonEvents {
         rx: self.buttons.subscribe(),
      }
   }
}

/// Subscription to button events.
#[derive(Debug)]
pub struct ButtonEvents {
   rx: broadcast::Receiver<ButtonEvent>,
}

impl ButtonEvents {
   /// Waits for the next button event.
   ///
   /// Returns `None` once the bus is gone. Events dropped because this
   /// subscriber lagged are skipped with a warning.
   pub async fn recv(&mut self) -> Option<ButtonEvent> {
      loop {
         match self.rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
               warn!("Button subscriber lagged, {n} event(s) dropped");
            },
            Err(broadcast::error::RecvError::Closed) => return None,
         }
      }
   }

   /// Returns an already queued event without waiting.
   pub fn try_recv(&mut self) -> Option<ButtonEvent> {
      loop {
         match self.rx.try_recv() {
            Ok(event) => return Some(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
               warn!("Button subscriber lagged, {n} event(s) dropped");
            },
            Err(_) => return None,
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use bluer::Address;

   use super::*;
   use crate::accessory::{device::AccessoryDevice, protocol::ButtonId};

   #[tokio::test]
   async fn test_state_replays_latest() {
      let bus = EventBus::default();
      let device = AccessoryDevice::new(Address::any(), "APTT");
      bus.publish_state(ConnectionState::Connected(device.clone()));

      let rx = bus.subscribe_state();
      assert_eq!(*rx.borrow(), ConnectionState::Connected(device));
   }

   #[tokio::test]
   async fn test_republish_notifies() {
      let bus = EventBus::default();
      let rx = bus.subscribe_state();
      assert!(!rx.has_changed().unwrap());

      bus.publish_state(ConnectionState::Disconnected);
      assert!(rx.has_changed().unwrap());
   }

   #[tokio::test]
   async fn test_buttons_are_fire_only() {
      let bus = EventBus::default();
      bus.publish_button(ButtonEvent::new(ButtonId::Ptt1, true));

      let mut events = bus.subscribe_buttons();
      assert_eq!(events.try_recv(), None);

      bus.publish_button(ButtonEvent::new(ButtonId::Ptt1, false));
      assert_eq!(
         events.recv().await,
         Some(ButtonEvent::new(ButtonId::Ptt1, false))
      );
   }

   #[tokio::test]
   async fn test_lagging_subscriber_keeps_newest() {
      let bus = EventBus::new(2);
      let mut events = bus.subscribe_buttons();
      bus.publish_button(ButtonEvent::new(ButtonId::Left, true));
      bus.publish_button(ButtonEvent::new(ButtonId::Left, false));
      bus.publish_button(ButtonEvent::new(ButtonId::Right, true));

      assert_eq!(
         events.recv().await,
         Some(ButtonEvent::new(ButtonId::Left, false))
      );
      assert_eq!(
         events.recv().await,
         Some(ButtonEvent::new(ButtonId::Right, true))
      );
   }

   #[tokio::test]
   async fn test_capacity_out_of_range_is_clamped() {
      for capacity in [0, usize::MAX / 2 + 1, usize::MAX] {
         let bus = EventBus::new(capacity);
         let mut events = bus.subscribe_buttons();
         bus.publish_button(ButtonEvent::new(ButtonId::Emergency, true));
         assert_eq!(
            events.recv().await,
            Some(ButtonEvent::new(ButtonId::Emergency, true))
         );
      }
   }

   #[tokio::test]
   async fn test_closed_bus_ends_stream() {
      let bus = EventBus::default();
      let mut events = bus.subscribe_buttons();
      drop(bus);
      assert_eq!(events.recv().await, None);
   }
}
