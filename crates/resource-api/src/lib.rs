//! Authenticated access to the Thermolink resource API
//!
//! Every downstream call goes through `RequestExecutor`, which fetches a
//! bearer token from a `TokenSource`, applies the bounded retry policy and
//! unwraps the provider's `{errorNumber, errorMessage, body}` envelope into a
//! typed result or a classified `ClientError`. `StatusCache` sits above the
//! executor so repeated device status reads inside the TTL cost one request.

pub mod cache;
pub mod device;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod retry;

pub use cache::{CacheEntry, StatusCache};
pub use device::{DeviceClient, DeviceSettings, DeviceStatus, DeviceSummary};
pub use envelope::ApiEnvelope;
pub use error::{ClientError, Result};
pub use executor::{RequestExecutor, RequestSpec};
pub use retry::{AttemptOutcome, Failure, RetryPolicy, classify};

use std::future::Future;
use std::pin::Pin;

/// Source of bearer tokens for downstream requests.
///
/// The executor asks for a token before every attempt, so a source backed by
/// a lifecycle manager can refresh between retries. A failure is surfaced as
/// `ClientError::Auth` and never retried.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenSource>`).
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = thermolink_auth::Result<String>> + Send + '_>>;
}
