//! HTTP/HTTPS transport
//!
//! Blocking reqwest client: redirects are followed (bounded), error status
//! codes fail the transfer and TLS peers are not verified, the same policy
//! an installer booted from arbitrary media needs.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;

use super::{codes, Stream};
use crate::config::defaults;
use crate::core::url::{InstallUrl, PrintMode};
use crate::error::FetchError;

/// Build the client used for one transfer
fn client(proxy: Option<&str>) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .redirect(Policy::limited(defaults::MAX_REDIRECTS))
        .danger_accept_invalid_certs(true)
        .connect_timeout(Duration::from_secs(30))
        .timeout(None::<Duration>);

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
            FetchError::transport(
                codes::COULDNT_RESOLVE_PROXY,
                format!("Invalid proxy '{proxy}': {e}"),
            )
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchError::transport(codes::UNSUPPORTED_PROTOCOL, e.to_string()))
}

/// Classify a reqwest failure the way libcurl would report it
fn classify(error: &reqwest::Error) -> FetchError {
    let code = if error.is_timeout() {
        codes::OPERATION_TIMEDOUT
    } else if error.is_connect() {
        codes::COULDNT_CONNECT
    } else if error.is_redirect() {
        codes::TOO_MANY_REDIRECTS
    } else if error.is_status() {
        codes::HTTP_RETURNED_ERROR
    } else if error.is_builder() {
        codes::UNSUPPORTED_PROTOCOL
    } else {
        codes::RECV_ERROR
    };
    FetchError::transport(code, error.to_string())
}

/// Start a GET request for `url`
pub fn open(url: &InstallUrl) -> Result<Stream, FetchError> {
    let client = client(url.proxy.as_deref())?;
    let target = url.print(PrintMode::Transport);

    let response = client.get(&target).send().map_err(|e| classify(&e))?;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(FetchError::transport(
            codes::HTTP_RETURNED_ERROR,
            format!("The requested URL returned error: {}", status.as_u16()),
        ));
    }

    Ok(Stream {
        total: response.content_length(),
        reader: Box::new(response),
    })
}
