//! Bearer tokens for the resource API, backed by the session manager

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use resource_api::TokenSource;
use thermolink_session::TokenManager;

/// Hands the executor a token that is valid past the refresh buffer,
/// refreshing first when needed.
pub struct ManagedTokenSource {
    manager: Arc<TokenManager>,
}

impl ManagedTokenSource {
    pub fn new(manager: Arc<TokenManager>) -> Self {
        Self { manager }
    }
}

impl TokenSource for ManagedTokenSource {
    fn access_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = thermolink_auth::Result<String>> + Send + '_>> {
        Box::pin(self.manager.get_valid_token())
    }
}
