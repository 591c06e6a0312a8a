//! Outward-facing seams: the HTTP transport a host application plugs in,
//! and the REST adapter built on top of it.

mod http;
mod rest;

pub use self::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ValidatedUrl,
    DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS,
};
pub use self::rest::{classify_status, ApiErrorResponse, RestCollection, RestConfig};
