//! Thermolink identity provider constants
//!
//! Public client configuration for the Thermolink B2C tenant. These values
//! identify the mobile client application and are not secrets. The actual
//! secrets (access/refresh tokens) are managed by the token store.

/// Identity provider host. Every endpoint lives under `/{tenant}/{policy}/`.
pub const IDP_BASE_URL: &str = "https://login.thermolink.io";

/// B2C tenant hosting the sign-in policy
pub const TENANT: &str = "thermolinkb2c.onmicrosoft.com";

/// Sign-in user flow. Also sent as the `p` query parameter on form posts.
pub const POLICY: &str = "B2C_1A_SignIn_Mobile";

/// Public OAuth client ID of the Thermolink mobile app
pub const CLIENT_ID: &str = "6f1c2a9e-4b7d-4e38-9a15-c2d8e0b3f471";

/// Redirect URI registered for the mobile client. Never actually loaded:
/// the login flow intercepts the redirect and reads the code from it.
pub const REDIRECT_URI: &str = "msauth.io.thermolink.mobile://auth";

/// Scopes requested on authorize and token calls. `offline_access` is what
/// makes the provider issue a refresh token.
pub const SCOPES: &str = "openid offline_access 6f1c2a9e-4b7d-4e38-9a15-c2d8e0b3f471";

/// Refresh token lifetime assumed when the token endpoint omits
/// `refresh_token_expires_in` (90 days, the tenant's configured maximum).
pub const DEFAULT_REFRESH_TOKEN_LIFETIME_SECS: u64 = 7_776_000;

/// Access token lifetime assumed when the token endpoint returns neither
/// `expires_on` nor `expires_in`.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: u64 = 3_600;
