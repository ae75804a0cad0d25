//! DPoP-authenticated access to a Solid pod
//!
//! Request flow:
//! 1. A resource operation (`PodSession::upload_resource()` etc.) builds a
//!    `PodRequest` with its LDP headers
//! 2. `PodSession::send()` refreshes proactively if the token is about to
//!    expire, then hands the request to the `RequestExecutor`
//! 3. The executor signs a proof for the exact URL, sends once and classifies
//!    the response
//! 4. On 401 the session runs one single-flight refresh and resends once
//!
//! `SolidAccount` exposes the same operations through the host's `Account`
//! and `CloudStorage` traits.

pub mod account;
pub mod error;
pub mod metrics;
pub mod request;
pub mod resources;
pub mod session;

#[cfg(test)]
mod stub;

pub use account::{SolidAccount, SolidAccountBuilder};
pub use error::{Error, Precondition, Result};
pub use request::{
    Failure, FailureCause, PodRequest, RequestExecutor, RequestOutcome, Success, resolve_url,
};
pub use resources::{BASIC_CONTAINER_LINK, Lookup, RESOURCE_LINK, UploadMethod};
pub use session::{DEFAULT_REFRESH_SKEW, PodSession};
