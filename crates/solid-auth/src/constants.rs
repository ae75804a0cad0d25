//! Protocol constants for Solid-OIDC token handling
//!
//! None of these are secrets; they name grant types, header fields and JOSE
//! parameters fixed by RFC 9449 (DPoP) and RFC 6749 (OAuth 2.0).

/// `typ` header value of a DPoP proof JWT
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// Request header carrying the proof (lowercase for `HeaderName::from_static`)
pub const DPOP_HEADER: &str = "dpop";

/// Authorization scheme for DPoP-bound access tokens
pub const DPOP_AUTH_SCHEME: &str = "DPoP";

/// Grant type for the first exchange of an authorization code
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// Grant type for every exchange after the first
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Error code a token endpoint returns for a revoked or expired grant
pub const INVALID_GRANT: &str = "invalid_grant";

/// Request header in which a client hands over base64-encoded code parameters
pub const ACCOUNT_DETAILS_HEADER: &str = "x-account-details";

/// Account scheme name used by the host to pick this backend
pub const ACCOUNT_SCHEME: &str = "solid";
