//! Accessory protocol definitions and data structures.
//!
//! The accessory reports button activity as short AT-style text commands
//! over its serial channel, e.g. `AT+PTT=P\r\n` for a PTT press. This module
//! holds the token table and the event types those commands map to.

/// Serial Port Profile service UUID the accessory listens on.
pub const SPP_UUID: uuid::Uuid = uuid::Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// Upper bound for a single read from the accessory channel.
pub const CHUNK_SIZE: usize = 64;

/// Trailing character marking a press; anything else is a release.
pub const PRESSED_MARKER: char = 'P';

/// Physical buttons exposed by the accessory.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   strum::Display,
   strum::EnumString,
   strum::EnumIter,
   strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ButtonId {
   Ptt1,
   Ptt2,
   Emergency,
   Left,
   Right,
   VolUp,
   VolDown,
}

impl ButtonId {
   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

/// How the `pressed` flag of an event is derived from its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressRule {
   /// Pressed iff the chunk ends in [`PRESSED_MARKER`].
   TrailingMarker,
   /// Never pressed; the accessory only reports the step.
   AlwaysReleased,
}

/// Token table, in match order. No token is a substring of another.
pub const TOKENS: &[(&str, ButtonId, PressRule)] = &[
   ("+PTT=", ButtonId::Ptt1, PressRule::TrailingMarker),
   ("+PTTS=", ButtonId::Ptt2, PressRule::TrailingMarker),
   ("+PTTE=", ButtonId::Emergency, PressRule::TrailingMarker),
   ("+PTTB1=", ButtonId::Left, PressRule::TrailingMarker),
   ("+PTTB2=", ButtonId::Right, PressRule::TrailingMarker),
   ("+VGS=U", ButtonId::VolUp, PressRule::AlwaysReleased),
   ("+VGS=D", ButtonId::VolDown, PressRule::AlwaysReleased),
];

/// A single decoded button transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ButtonEvent {
   pub button: ButtonId,
   pub pressed: bool,
}

impl ButtonEvent {
   pub const fn new(button: ButtonId, pressed: bool) -> Self {
      Self { button, pressed }
   }
}

impl std::fmt::Display for ButtonEvent {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let state = if self.pressed { "pressed" } else { "released" };
      write!(f, "{} {state}", self.button)
   }
}
