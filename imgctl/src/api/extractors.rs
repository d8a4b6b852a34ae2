//! Request extractors shared by the handlers.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts, uri::Authority},
};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::AppState;
use crate::storage::StoredImage;

/// URL prefix under which stored images are served.
pub const UPLOADS_PREFIX: &str = "/uploads";

/// Characters escaped inside a single URL path segment. Includes `/` and `%` so every segment
/// decodes back to exactly the name on disk.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Scheme and host the client used to reach the service.
///
/// Returned image URLs are built from it, and URLs sent back for deletion must match it.
/// `X-Forwarded-Proto` / `X-Forwarded-Host` are honoured only when `trust_proxy_headers` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    pub scheme: String,
    pub host: String,
}

impl FromRequestParts<AppState> for RequestOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts, state.config.trust_proxy_headers))
    }
}

impl RequestOrigin {
    pub fn from_parts(parts: &Parts, trust_proxy_headers: bool) -> Self {
        let forwarded_scheme = trust_proxy_headers
            .then(|| first_header_value(&parts.headers, "x-forwarded-proto"))
            .flatten()
            .map(|scheme| scheme.to_ascii_lowercase())
            .filter(|scheme| scheme == "http" || scheme == "https");

        let scheme = forwarded_scheme
            .or_else(|| parts.uri.scheme_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| "http".to_string());

        let forwarded_host = trust_proxy_headers
            .then(|| first_header_value(&parts.headers, "x-forwarded-host"))
            .flatten()
            .filter(|host| is_valid_authority(host));

        let host = forwarded_host
            .or_else(|| first_header_value(&parts.headers, "host").filter(|host| is_valid_authority(host)))
            .or_else(|| parts.uri.authority().map(|authority| authority.as_str().to_string()))
            .unwrap_or_else(|| "localhost".to_string());

        Self { scheme, host }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Public URL of a stored image: `<scheme>://<host>/uploads/<job id>/<filename>`.
    pub fn image_url(&self, image: &StoredImage) -> String {
        let mut url = format!("{}{UPLOADS_PREFIX}", self.base_url());
        for segment in image.segments() {
            url.push('/');
            url.extend(utf8_percent_encode(segment, PATH_SEGMENT));
        }
        url
    }

    /// Path below the storage root named by a public image URL.
    ///
    /// The URL must share this origin's scheme, host and port and point under `/uploads/`.
    /// Segments are percent-decoded; a decoded segment that smuggles in a separator or NUL is
    /// rejected. `..` is not handled here: the URL parser already resolves dot segments and the
    /// storage root rejects anything that still escapes.
    pub fn upload_path(&self, image_url: &str) -> Option<String> {
        let url = Url::parse(image_url).ok()?;
        let base = Url::parse(&self.base_url()).ok()?;

        if url.scheme() != base.scheme() || url.host() != base.host() || url.port_or_known_default() != base.port_or_known_default() {
            return None;
        }

        let mut segments = url.path_segments()?;
        if segments.next()? != UPLOADS_PREFIX.trim_start_matches('/') {
            return None;
        }

        // Empty segments from repeated slashes carry no path component
        let decoded = segments
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                let segment = percent_decode_str(segment).decode_utf8().ok()?;
                (!segment.contains(['/', '\\', '\0'])).then(|| segment.into_owned())
            })
            .collect::<Option<Vec<_>>>()?;

        if decoded.is_empty() {
            return None;
        }

        Some(decoded.join("/"))
    }
}

fn first_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn is_valid_authority(host: &str) -> bool {
    // Userinfo would let a client smuggle credentials into URLs handed to other clients
    !host.contains('@') && host.parse::<Authority>().is_ok()
}
