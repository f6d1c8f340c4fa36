use std::time::Duration;

use opsgate_core::UpstreamError;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|error| UpstreamError::Transport(format!("failed to build http client: {error}")))
}

pub(crate) fn parse_base_url(base: &str, what: &str) -> Result<Url, UpstreamError> {
    let url = Url::parse(base)
        .map_err(|error| UpstreamError::Transport(format!("invalid {what} `{base}`: {error}")))?;
    if url.cannot_be_a_base() {
        return Err(UpstreamError::Transport(format!("{what} `{base}` cannot carry a path")));
    }
    Ok(url)
}

/// Appends `segments` to `base`, percent-encoding each one so `/`, `?` and `%` inside a
/// parameter stay within its own path segment.
pub(crate) fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, UpstreamError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| UpstreamError::Transport(format!("`{base}` cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) async fn send(
    request: RequestBuilder,
    timeout_secs: u64,
) -> Result<Response, UpstreamError> {
    let response = request.send().await.map_err(|error| transport_error(error, timeout_secs))?;
    check_status(response).await
}

pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<T, UpstreamError> {
    response
        .json::<T>()
        .await
        .map_err(|error| UpstreamError::Decode(format!("failed to decode {what}: {error}")))
}

pub(crate) async fn decode_text(response: Response, what: &str) -> Result<String, UpstreamError> {
    response
        .text()
        .await
        .map_err(|error| UpstreamError::Decode(format!("failed to read {what}: {error}")))
}

fn transport_error(error: reqwest::Error, timeout_secs: u64) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Timeout(timeout_secs)
    } else {
        UpstreamError::Transport(error.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status.canonical_reason().unwrap_or("unexpected upstream status").to_string()
    });

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Auth(message),
        StatusCode::NOT_FOUND => UpstreamError::NotFound(message),
        other => UpstreamError::Status { status: other.as_u16(), message },
    })
}

/// Pulls the human readable message out of management (`error.message`), cluster
/// (`message`) and identity (`error_description`) error bodies.
fn error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    payload
        .pointer("/error/message")
        .or_else(|| payload.get("error_description"))
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use reqwest::Url;

    use super::{error_message, join_segments, parse_base_url};

    #[test]
    fn segments_are_percent_encoded_individually() {
        let base = parse_base_url("https://cluster.example.test/", "cluster server").expect("base");
        let url = join_segments(&base, ["api", "v1", "pods", "../secrets/db-password?"])
            .expect("join");

        assert_eq!(
            url.as_str(),
            "https://cluster.example.test/api/v1/pods/..%2Fsecrets%2Fdb-password%3F"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().map(Iterator::count), Some(4));
    }

    #[test]
    fn base_without_path_support_is_rejected() {
        assert!(parse_base_url("mailto:ops@example.test", "endpoint").is_err());
        assert!(parse_base_url("not a url", "endpoint").is_err());
        let base = Url::parse("https://management.example.test").expect("url");
        assert_eq!(
            join_segments(&base, ["subscriptions"]).expect("join").as_str(),
            "https://management.example.test/subscriptions"
        );
    }

    #[test]
    fn management_error_message_is_extracted() {
        let body = r#"{"error":{"code":"ResourceNotFound","message":"The Resource 'x' was not found."}}"#;
        assert_eq!(error_message(body).as_deref(), Some("The Resource 'x' was not found."));
    }

    #[test]
    fn cluster_status_message_is_extracted() {
        let body = r#"{"kind":"Status","message":"pods \"api\" not found","code":404}"#;
        assert_eq!(error_message(body).as_deref(), Some("pods \"api\" not found"));
    }

    #[test]
    fn identity_error_description_is_extracted() {
        let body = r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret."}"#;
        assert_eq!(error_message(body).as_deref(), Some("AADSTS7000215: Invalid client secret."));
    }

    #[test]
    fn non_json_body_yields_none() {
        assert_eq!(error_message("<html>bad gateway</html>"), None);
    }
}
