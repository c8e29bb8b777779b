//! Chunk decoding for the accessory protocol.
//!
//! There is no framing on the wire: each read result is one candidate
//! chunk, matched by substring against the token table.

use std::borrow::Cow;

use crate::accessory::protocol::{ButtonEvent, PRESSED_MARKER, PressRule, TOKENS};

/// Decodes one chunk into at most one button event.
///
/// Returns `None` when no known token occurs in the chunk.
pub fn decode(chunk: &[u8]) -> Option<ButtonEvent> {
   let text = String::from_utf8_lossy(chunk);
   decode_str(&text)
}

pub fn decode_str(text: &str) -> Option<ButtonEvent> {
   let (_, button, rule) = TOKENS.iter().find(|(token, ..)| text.contains(*token))?;
   let pressed = match rule {
      PressRule::TrailingMarker => last_char(text) == Some(PRESSED_MARKER),
      PressRule::AlwaysReleased => false,
   };
   Some(ButtonEvent::new(*button, pressed))
}

/// Last character before any line terminator.
fn last_char(text: &str) -> Option<char> {
   text.trim_end_matches(['\r', '\n']).chars().next_back()
}

/// Printable form of a chunk for logs.
pub fn describe(chunk: &[u8]) -> Cow<'_, str> {
   String::from_utf8_lossy(chunk)
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::accessory::protocol::ButtonId;

   const BUTTON_TOKENS: &[(&str, ButtonId)] = &[
      ("+PTT=", ButtonId::Ptt1),
      ("+PTTS=", ButtonId::Ptt2),
      ("+PTTE=", ButtonId::Emergency),
      ("+PTTB1=", ButtonId::Left),
      ("+PTTB2=", ButtonId::Right),
   ];

   #[test]
   fn test_trailing_p_means_pressed() {
      for (token, button) in BUTTON_TOKENS {
         let event = decode(format!("{token}P").as_bytes()).unwrap();
         assert_eq!(event, ButtonEvent::new(*button, true), "{token}");

         let event = decode(format!("{token}R").as_bytes()).unwrap();
         assert_eq!(event, ButtonEvent::new(*button, false), "{token}");
      }
   }

   #[test]
   fn test_volume_is_never_pressed() {
      assert_eq!(
         decode(b"+VGS=UP"),
         Some(ButtonEvent::new(ButtonId::VolUp, false))
      );
      assert_eq!(
         decode(b"+VGS=DP"),
         Some(ButtonEvent::new(ButtonId::VolDown, false))
      );
      assert_eq!(
         decode(b"+VGS=U"),
         Some(ButtonEvent::new(ButtonId::VolUp, false))
      );
   }

   #[test]
   fn test_at_commands_with_line_endings() {
      assert_eq!(
         decode(b"AT+PTT=P\r\n"),
         Some(ButtonEvent::new(ButtonId::Ptt1, true))
      );
      assert_eq!(
         decode(b"AT+PTT=R\r\n"),
         Some(ButtonEvent::new(ButtonId::Ptt1, false))
      );
      assert_eq!(
         decode(b"AT+PTTB2=P\n"),
         Some(ButtonEvent::new(ButtonId::Right, true))
      );
      assert_eq!(
         decode(b"AT+VGS=D\r\n"),
         Some(ButtonEvent::new(ButtonId::VolDown, false))
      );
   }

   #[test]
   fn test_unknown_chunks() {
      assert_eq!(decode(b"garbage"), None);
      assert_eq!(decode(b"AT+FOO\r\n"), None);
      assert_eq!(decode(b""), None);
      assert_eq!(decode(b"\r\n"), None);
      // partial token split across reads
      assert_eq!(decode(b"AT+PT"), None);
   }

   #[test]
   fn test_invalid_utf8_is_tolerated() {
      assert_eq!(
         decode(b"\xff\xfeAT+PTTE=P"),
         Some(ButtonEvent::new(ButtonId::Emergency, true))
      );
      assert_eq!(decode(b"\xff\xfe"), None);
   }

   #[test]
   fn test_token_with_nothing_after_it() {
      assert_eq!(
         decode(b"+PTTS="),
         Some(ButtonEvent::new(ButtonId::Ptt2, false))
      );
   }
}
