//! Web Push delivery: VAPID authentication, `aes128gcm` payload encryption
//! and the dispatch loop that reconciles push service responses with the
//! subscription store.

pub mod base64url;
pub mod batch;
pub mod dispatch;
pub mod ece;
mod error;
pub mod filter;
pub mod jose;
pub mod transport;
pub mod vapid;

pub use batch::{run_batch, DispatchReport, FailureEntry};
pub use dispatch::{DeliveryOutcome, Dispatcher, Verdict};
pub use error::PushError;
pub use filter::DispatchFilter;
pub use transport::{PushRequest, PushResponse, PushTransport, ReqwestTransport};
pub use vapid::{VapidConfig, VapidKeyPair};
