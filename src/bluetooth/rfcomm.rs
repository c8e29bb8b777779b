//! RFCOMM channel establishment for the accessory.
//!
//! The accessory exposes its control stream as a Serial Port Profile
//! service. Opening a channel is abstracted behind [`Connector`] so the
//! connection lifecycle does not depend on BlueZ directly.

use std::{future::Future, time::Duration};

use bluer::{
   Adapter, Session,
   rfcomm::{Profile, Role, Stream},
};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::{
   io::{AsyncRead, AsyncWrite},
   select, time,
};

use crate::{
   accessory::{device::AccessoryDevice, protocol::SPP_UUID},
   error::{PttError, Result},
};

/// Number of attempts made by [`connect`] unless configured otherwise.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
/// Timeout for a single RFCOMM connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bidirectional byte stream to the accessory.
///
/// Dropping the channel closes it.
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Channel for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Opens channels to matched devices. One call is one attempt.
pub trait Connector: Send + Sync + 'static {
   type Channel: Channel;

   fn open(&self, device: &AccessoryDevice) -> impl Future<Output = Result<Self::Channel>> + Send;
}

/// Opens a channel to `device`, retrying immediately on failure.
///
/// Makes at most `max_attempts` attempts (at least one) with no delay
/// between them. When all fail, the last failure is returned inside
/// [`PttError::ConnectionFailed`].
pub async fn connect<C: Connector>(
   connector: &C,
   device: &AccessoryDevice,
   max_attempts: u32,
) -> Result<C::Channel> {
   let max_attempts = max_attempts.max(1);
   let mut attempts = 0;
   loop {
      attempts += 1;
      debug!("Connecting to {device} (attempt {attempts}/{max_attempts})");
      match connector.open(device).await {
         Ok(channel) => {
            info!("Connected to {device} after {attempts} attempt(s)");
            return Ok(channel);
         },
         Err(e) if attempts < max_attempts => {
            warn!("Connection attempt {attempts} to {device} failed: {e}");
         },
         Err(e) => {
            return Err(PttError::ConnectionFailed {
               attempts,
               source: Box::new(e),
            });
         },
      }
   }
}

/// [`Connector`] backed by a BlueZ SPP client profile.
#[derive(Clone)]
pub struct RfcommConnector {
   session: Session,
   adapter: Option<String>,
}

impl RfcommConnector {
   pub const fn new(session: Session, adapter: Option<String>) -> Self {
      Self { session, adapter }
   }

   async fn adapter(&self) -> Result<Adapter> {
      match &self.adapter {
         Some(name) => Ok(self.session.adapter(name)?),
         None => Ok(self.session.default_adapter().await?),
      }
   }

   async fn open_stream(&self, device: &AccessoryDevice) -> Result<Stream> {
      let adapter = self.adapter().await?;
      let bt_device = adapter.device(device.address())?;

      let profile = Profile {
         uuid: SPP_UUID,
         role: Some(Role::Client),
         require_authentication: Some(false),
         require_authorization: Some(false),
         auto_connect: Some(false),
         ..Default::default()
      };
      // Unregistered again when the handle drops.
      let requests = self.session.register_profile(profile).await?;
      tokio::pin!(requests);

      debug!("Requesting SPP connection to {device}");
      let connect = bt_device.connect_profile(&SPP_UUID);
      tokio::pin!(connect);
      let mut requested = false;

      // BlueZ completes the profile connection only once the request is
      // accepted, so both sides are driven together.
      loop {
         select! {
            res = &mut connect, if !requested => {
               res?;
               requested = true;
            }
            req = requests.next() => {
               let req = req.ok_or(PttError::ConnectionClosed)?;
               debug!("Accepting SPP connection from {}", req.device());
               return Ok(req.accept()?);
            }
         }
      }
   }
}

impl Connector for RfcommConnector {
   type Channel = Stream;

   async fn open(&self, device: &AccessoryDevice) -> Result<Stream> {
      time::timeout(CONNECT_TIMEOUT, self.open_stream(device))
         .await
         .map_err(|_| PttError::RequestTimeout)?
   }
}

#[cfg(test)]
pub(crate) mod tests {
   use std::{
      io,
      sync::{
         Arc,
         atomic::{AtomicU32, Ordering},
      },
   };

   use bluer::Address;
   use tokio::{
      io::DuplexStream,
      sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
   };

   use super::*;

   /// Connector that fails a fixed number of attempts, then hands out
   /// in-memory channels whose remote ends go to the test.
   pub(crate) struct StubConnector {
      failures: u32,
      attempts: Arc<AtomicU32>,
      peers: UnboundedSender<DuplexStream>,
   }

   pub(crate) struct StubPeers {
      pub attempts: Arc<AtomicU32>,
      pub peers: UnboundedReceiver<DuplexStream>,
   }

   impl StubPeers {
      pub fn attempts(&self) -> u32 {
         self.attempts.load(Ordering::SeqCst)
      }

      pub async fn next_peer(&mut self) -> DuplexStream {
         time::timeout(Duration::from_secs(5), self.peers.recv())
            .await
            .expect("no channel opened")
            .expect("connector dropped")
      }
   }

   impl StubConnector {
      pub fn new(failures: u32) -> (Self, StubPeers) {
         let attempts = Arc::new(AtomicU32::new(0));
         let (tx, rx) = mpsc::unbounded_channel();
         (
            Self {
               failures,
               attempts: attempts.clone(),
               peers: tx,
            },
            StubPeers {
               attempts,
               peers: rx,
            },
         )
      }
   }

   impl Connector for StubConnector {
      type Channel = DuplexStream;

      async fn open(&self, _device: &AccessoryDevice) -> Result<DuplexStream> {
         let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
         if attempt <= self.failures {
            return Err(PttError::Io(io::Error::new(
               io::ErrorKind::ConnectionRefused,
               "accessory not listening",
            )));
         }
         let (local, remote) = tokio::io::duplex(256);
         let _ = self.peers.send(remote);
         Ok(local)
      }
   }

   /// Lets the read loop consume everything written so far, so the next
   /// write arrives as a chunk of its own.
   pub(crate) async fn settle() {
      time::sleep(Duration::from_millis(50)).await;
   }

   pub(crate) fn accessory() -> AccessoryDevice {
      AccessoryDevice::new(Address::new([0x00, 0x1b, 0x10, 0x00, 0x2a, 0x01]), "APTT-2")
   }

   #[tokio::test]
   async fn test_succeeds_on_third_attempt() {
      let (connector, peers) = StubConnector::new(2);
      let channel = connect(&connector, &accessory(), 3).await;
      assert!(channel.is_ok());
      assert_eq!(peers.attempts(), 3);
   }

   #[tokio::test]
   async fn test_first_attempt_success_does_not_retry() {
      let (connector, peers) = StubConnector::new(0);
      connect(&connector, &accessory(), 3).await.unwrap();
      assert_eq!(peers.attempts(), 1);
   }

   #[tokio::test]
   async fn test_gives_up_after_max_attempts() {
      for max_attempts in [1, 3, 5] {
         let (connector, peers) = StubConnector::new(u32::MAX);
         let err = connect(&connector, &accessory(), max_attempts)
            .await
            .unwrap_err();

         assert_eq!(peers.attempts(), max_attempts);
         match err {
            PttError::ConnectionFailed { attempts, source } => {
               assert_eq!(attempts, max_attempts);
               assert!(matches!(*source, PttError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionRefused));
            },
            other => panic!("unexpected error: {other}"),
         }
      }
   }

   #[tokio::test]
   async fn test_zero_attempts_still_tries_once() {
      let (connector, peers) = StubConnector::new(u32::MAX);
      assert!(connect(&connector, &accessory(), 0).await.is_err());
      assert_eq!(peers.attempts(), 1);
   }
}
