//! Small helpers shared by the HTTP wire backends.

use crate::error::StoreError;

/// Join a path onto a base endpoint. Both sides are trimmed so sibling
/// operations cannot disagree about leading or trailing slashes.
pub(crate) fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Pass a response through unchanged when 2xx, otherwise surface a
/// protocol error carrying the status and response body.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Protocol {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::join_url;

    #[test]
    fn join_url_canonicalizes_slashes() {
        assert_eq!(
            join_url("http://localhost:6333/", "/collections/mem"),
            "http://localhost:6333/collections/mem"
        );
        assert_eq!(
            join_url("http://localhost:6333", "collections/mem"),
            "http://localhost:6333/collections/mem"
        );
    }
}
