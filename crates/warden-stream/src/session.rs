// ABOUTME: Session identity: issuing session ids and building authenticated connection URLs.
// ABOUTME: HttpSessionIssuer asks the backend for a fresh id; StaticSessionIssuer mints one locally.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::error::{Result, StreamError};

/// Query parameter carrying the access token on the connection URL.
pub const TOKEN_PARAM: &str = "token";

/// Supplies the caller's current access token, if any.
pub trait TokenSupplier: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// A token fixed at construction time.
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken")
            .field(&self.0.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl TokenSupplier for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Creates session ids for new conversations.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn create_session(&self) -> Result<String>;
}

/// Mints ids locally without asking the backend.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionIssuer;

#[async_trait]
impl SessionIssuer for StaticSessionIssuer {
    async fn create_session(&self) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    session_id: String,
}

/// Asks `POST {base}/sessions` for a new session id.
pub struct HttpSessionIssuer<T> {
    client: reqwest::Client,
    base: Url,
    tokens: T,
}

impl<T: TokenSupplier> HttpSessionIssuer<T> {
    pub fn new(base: Url, tokens: T) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base,
            tokens,
        })
    }

    fn sessions_url(&self) -> Result<Url> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join("sessions")?)
    }
}

#[async_trait]
impl<T: TokenSupplier> SessionIssuer for HttpSessionIssuer<T> {
    async fn create_session(&self) -> Result<String> {
        let url = self.sessions_url()?;
        let mut request = self.client.post(url.clone()).json(&serde_json::json!({}));
        if let Some(token) = self.tokens.access_token() {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StreamError::SessionIssue(format!(
                "backend returned {}: {}",
                status, body
            )));
        }

        let session: SessionResponse = resp.json().await?;
        if session.session_id.trim().is_empty() {
            return Err(StreamError::SessionIssue("empty session id".into()));
        }
        tracing::info!(url = %url, "Issued new session");
        Ok(session.session_id)
    }
}

/// Endpoint with the access token attached when one is available.
pub fn connection_url(endpoint: &Url, tokens: &dyn TokenSupplier) -> Url {
    let mut url = endpoint.clone();
    if let Some(token) = tokens.access_token() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != TOKEN_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(TOKEN_PARAM, &token);
        }
    }
    url
}

/// Parse and check a streaming endpoint.
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StreamError::InvalidEndpoint("endpoint is empty".into()));
    }
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(StreamError::InvalidEndpoint(format!(
            "expected ws:// or wss://, got {}://",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_issuer_mints_unique_ids() {
        let issuer = StaticSessionIssuer;
        let a = issuer.create_session().await.unwrap();
        let b = issuer.create_session().await.unwrap();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_connection_url_appends_token() {
        let endpoint = Url::parse("wss://assist.example.com/ws/policy?lang=en").unwrap();
        let url = connection_url(&endpoint, &StaticToken::new(Some("abc 123".into())));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("lang".to_string(), "en".to_string()),
                ("token".to_string(), "abc 123".to_string())
            ]
        );
    }

    #[test]
    fn test_connection_url_replaces_stale_token() {
        let endpoint = Url::parse("wss://assist.example.com/ws?token=old").unwrap();
        let url = connection_url(&endpoint, &StaticToken::new(Some("new".into())));
        assert_eq!(url.query(), Some("token=new"));
    }

    #[test]
    fn test_connection_url_without_token_is_unchanged() {
        let endpoint = Url::parse("ws://localhost:8000/ws").unwrap();
        assert_eq!(connection_url(&endpoint, &StaticToken::new(None)), endpoint);
        assert_eq!(
            connection_url(&endpoint, &StaticToken::new(Some("  ".into()))),
            endpoint
        );
    }

    #[test]
    fn test_static_token_debug_redacts() {
        let debug = format!("{:?}", StaticToken::new(Some("secret-token".into())));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_parse_endpoint() {
        assert!(parse_endpoint("wss://assist.example.com/ws").is_ok());
        assert!(matches!(
            parse_endpoint("   "),
            Err(StreamError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            parse_endpoint("https://assist.example.com"),
            Err(StreamError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(StreamError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_sessions_url_joins_under_base_path() {
        let issuer = HttpSessionIssuer::new(
            Url::parse("https://api.example.com/v1").unwrap(),
            StaticToken::default(),
        )
        .unwrap();
        assert_eq!(
            issuer.sessions_url().unwrap().as_str(),
            "https://api.example.com/v1/sessions"
        );
    }

    #[tokio::test]
    async fn test_http_issuer_unreachable_backend_errors() {
        let issuer = HttpSessionIssuer::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            StaticToken::default(),
        )
        .unwrap();
        assert!(matches!(
            issuer.create_session().await,
            Err(StreamError::SessionIssue(_))
        ));
    }
}
