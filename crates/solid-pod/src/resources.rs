//! Containers and resources on the pod
//!
//! Directories are LDP basic containers, files are LDP resources. Every
//! operation is one or two requests through `PodSession::send`, so each gets
//! the shared refresh-and-retry policy.
//!
//! Neither `upload_resource` nor `ensure_directory_exists` is atomic: both
//! look up first and write second, and the pod offers no conditional write.
//! Two callers racing on the same name can both see it missing. Callers that
//! care serialize per path.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LINK};
use tracing::{debug, info, warn};

use crate::error::{Error, Precondition, Result};
use crate::request::PodRequest;
use crate::session::PodSession;

/// `Link` value declaring a basic container
pub const BASIC_CONTAINER_LINK: &str = r#"<http://www.w3.org/ns/ldp#BasicContainer>; rel="type""#;

/// `Link` value declaring a plain resource
pub const RESOURCE_LINK: &str = r#"<http://www.w3.org/ns/ldp#Resource>; rel="type""#;

const TEXT_TURTLE: &str = "text/turtle";

fn slug() -> HeaderName {
    HeaderName::from_static("slug")
}

/// How new files are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadMethod {
    /// `PUT <dir>/<name>`; the client picks the final URL.
    #[default]
    Put,
    /// `POST <dir>` with a `Slug` hint; the pod may pick another name.
    Post,
}

impl FromStr for UploadMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "put" => Ok(UploadMethod::Put),
            "post" => Ok(UploadMethod::Post),
            other => Err(format!("unknown upload method {other:?}, expected put or post")),
        }
    }
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadMethod::Put => "put",
            UploadMethod::Post => "post",
        })
    }
}

/// Result of a lookup that reached the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found,
    NotFound,
}

impl Lookup {
    pub fn is_found(self) -> bool {
        self == Lookup::Found
    }
}

/// `dir/name`, or just `name` at the root.
fn resource_path(name: &str, dir: Option<&str>) -> Result<String> {
    if name.is_empty() {
        return Err(Precondition::EmptyName.into());
    }
    Ok(match dir {
        Some(dir) if !dir.is_empty() => format!("{dir}/{name}"),
        _ => name.to_string(),
    })
}

fn text_header(value: &str, name: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Precondition::InvalidHeader(name.to_string()).into())
}

/// Whether any `Link` header carries `marker`.
fn has_link(headers: &HeaderMap, marker: &str) -> bool {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(marker))
}

impl PodSession {
    /// Create a container named `name` under the storage root.
    ///
    /// Does not check for an existing container; the pod answers a
    /// duplicate slug by picking another name.
    pub async fn create_directory(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Precondition::EmptyName.into());
        }
        let request = PodRequest::new(Method::POST)
            .header(CONTENT_TYPE, HeaderValue::from_static(TEXT_TURTLE))
            .header(LINK, HeaderValue::from_static(BASIC_CONTAINER_LINK))
            .header(slug(), text_header(name, "slug")?);

        let response = self.send(&request).await?;
        info!(
            name,
            status = response.status.as_u16(),
            location = ?response.headers.get(reqwest::header::LOCATION),
            "created directory"
        );
        Ok(())
    }

    pub async fn lookup_directory(&self, name: &str) -> Result<Lookup> {
        if name.is_empty() {
            return Err(Precondition::EmptyName.into());
        }
        let request = PodRequest::new(Method::HEAD)
            .path(name)
            .header(ACCEPT, HeaderValue::from_static(TEXT_TURTLE));
        self.lookup(&request, BASIC_CONTAINER_LINK).await
    }

    /// Pods type containers as `ldp:Resource` as well, so a container under
    /// this name also reports `Found`.
    pub async fn lookup_resource(&self, name: &str, dir: Option<&str>) -> Result<Lookup> {
        let request = PodRequest::new(Method::HEAD).path(resource_path(name, dir)?);
        self.lookup(&request, RESOURCE_LINK).await
    }

    async fn lookup(&self, request: &PodRequest, marker: &str) -> Result<Lookup> {
        match self.send(request).await {
            Ok(response) if has_link(&response.headers, marker) => {
                debug!(target = request.target(), "lookup found");
                Ok(Lookup::Found)
            }
            Ok(response) => {
                warn!(
                    target = request.target(),
                    status = response.status.as_u16(),
                    expected = marker,
                    "found resource without the expected type link"
                );
                Ok(Lookup::NotFound)
            }
            Err(Error::NotFound(_)) => {
                debug!(target = request.target(), "lookup not found");
                Ok(Lookup::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Write a new file, failing with `AlreadyExists` if one is there.
    pub async fn upload_resource(
        &self,
        name: &str,
        dir: Option<&str>,
        data: Bytes,
        mime_type: &mime::Mime,
    ) -> Result<()> {
        let path = resource_path(name, dir)?;
        if self.lookup_resource(name, dir).await?.is_found() {
            return Err(Error::AlreadyExists(path));
        }

        let request = match self.upload_method() {
            UploadMethod::Put => PodRequest::new(Method::PUT).path(path.as_str()),
            UploadMethod::Post => {
                let request = PodRequest::new(Method::POST);
                match dir {
                    Some(dir) if !dir.is_empty() => request.path(dir),
                    _ => request,
                }
            }
        };
        let request = request
            .header(CONTENT_TYPE, text_header(mime_type.as_ref(), "content-type")?)
            .header(LINK, HeaderValue::from_static(RESOURCE_LINK))
            .header(slug(), text_header(name, "slug")?)
            .body(data);

        let response = self.send(&request).await?;
        info!(
            path,
            method = %self.upload_method(),
            status = response.status.as_u16(),
            "uploaded file"
        );
        Ok(())
    }

    /// Raw bytes of a file. The pod offers no checksum.
    pub async fn download_resource(&self, name: &str, dir: Option<&str>) -> Result<Bytes> {
        let request = PodRequest::new(Method::GET).path(resource_path(name, dir)?);
        let response = self.send(&request).await?;
        debug!(target = request.target(), bytes = response.body.len(), "downloaded file");
        Ok(response.body)
    }

    /// Delete a file or an empty container.
    pub async fn delete_resource(&self, name: &str, dir: Option<&str>) -> Result<()> {
        let request = PodRequest::new(Method::DELETE).path(resource_path(name, dir)?);
        self.send(&request).await?;
        info!(target = request.target(), "deleted resource");
        Ok(())
    }

    /// Create the container unless it exists. Returns whether it was created.
    pub async fn ensure_directory_exists(&self, name: &str) -> Result<bool> {
        match self.lookup_directory(name).await? {
            Lookup::Found => Ok(false),
            Lookup::NotFound => {
                self.create_directory(name).await?;
                Ok(true)
            }
        }
    }
}
