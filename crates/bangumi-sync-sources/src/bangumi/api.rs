use serde::Deserialize;
use serde_json::Value;

/// Body of `GET /v0/users/{username}/collections`
#[derive(Debug, Deserialize)]
pub struct PageBody {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Error body returned by the v0 API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub fn collections_url(base_url: &str, username: &str) -> String {
    format!(
        "{}/v0/users/{}/collections",
        base_url.trim_end_matches('/'),
        urlencoding::encode(username)
    )
}

/// Human readable reason for a non-retryable status
pub fn describe_error_body(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| match (b.title, b.description) {
            (Some(t), Some(d)) => Some(format!("{}: {}", t, d)),
            (Some(t), None) => Some(t),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    let kind = match status {
        401 | 403 => "credentials rejected",
        404 => "user not found",
        400 | 422 => "malformed request",
        _ => "unexpected response",
    };
    if detail.is_empty() {
        format!("HTTP {} ({})", status, kind)
    } else {
        format!("HTTP {} ({}) - {}", status, kind, detail)
    }
}
