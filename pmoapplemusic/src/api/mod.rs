//! Couche d'accès aux API REST Apple Music et iTunes Search
//!
//! Ce module fournit une interface bas-niveau : chaque requête passe par le
//! [`RateLimitedClient`] partagé, puis son issue est classée en
//! [`ApiResponse`] pour que les couches supérieures puissent la traiter par
//! un `match` exhaustif.

pub mod catalog;
pub mod library;

use crate::error::{AppleMusicError, Result};
use crate::limiter::RateLimitedClient;
use reqwest::header::{
    AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// URL de base de l'API Apple Music
pub const DEFAULT_API_BASE: &str = "https://amp-api.music.apple.com";

/// URL de base de l'API iTunes Search
pub const DEFAULT_SEARCH_BASE: &str = "https://itunes.apple.com";

/// User-Agent d'un navigateur de bureau, attendu par l'API web
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.3";

/// Timeout par défaut des requêtes HTTP
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const MEDIA_USER_TOKEN: HeaderName = HeaderName::from_static("media-user-token");

/// Classe de réponse d'un appel à l'API
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
    /// Succès avec un corps exploitable
    Data(T),
    /// Succès sans corps (204, corps vide)
    Empty,
    /// 404
    NotFound,
    /// Autre erreur 4xx
    ClientError { status: u16, message: String },
    /// 5xx, ou 429 après épuisement des tentatives
    ServerError { status: u16, message: String },
}

impl<T> ApiResponse<T> {
    /// Classe l'issue d'un appel limité.
    ///
    /// Les erreurs de transport ou de parsing restent des `Err`.
    pub(crate) fn from_outcome(outcome: Result<Option<T>>) -> Result<Self> {
        match outcome {
            Ok(Some(data)) => Ok(Self::Data(data)),
            Ok(None) => Ok(Self::Empty),
            Err(AppleMusicError::NotFound(_)) => Ok(Self::NotFound),
            Err(AppleMusicError::BadRequest(message)) => Ok(Self::ClientError {
                status: 400,
                message,
            }),
            Err(AppleMusicError::Unauthorized { status, message }) => {
                Ok(Self::ClientError { status, message })
            }
            Err(AppleMusicError::RateLimited(message)) => Ok(Self::ServerError {
                status: 429,
                message,
            }),
            Err(AppleMusicError::Api { status, message }) if status >= 500 => {
                Ok(Self::ServerError { status, message })
            }
            Err(AppleMusicError::Api { status, message }) => {
                Ok(Self::ClientError { status, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Vrai pour `Data` et `Empty`
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Data(_) | Self::Empty)
    }
}

/// Client API bas-niveau pour Apple Music
pub struct AppleMusicApi {
    /// Client HTTP portant les en-têtes d'authentification
    client: Client,
    api_base: String,
    search_base: String,
    limiter: Arc<RateLimitedClient>,
}

impl AppleMusicApi {
    /// Crée un builder pour configurer l'API
    pub fn builder() -> ApiBuilder {
        ApiBuilder::default()
    }

    /// Construit une URL absolue sur l'API Apple Music.
    ///
    /// Accepte aussi un lien `next` de pagination déjà absolu.
    pub(crate) fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.api_base, path)
        }
    }

    pub(crate) fn search_url(&self, path: &str) -> String {
        format!("{}{}", self.search_base, path)
    }

    /// Effectue une requête GET limitée
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse<T>> {
        debug!("GET {} with {} params", url, params.len());
        let outcome = self
            .limiter
            .call(|| async move { Self::execute(self.client.get(url).query(params)).await })
            .await;
        ApiResponse::from_outcome(outcome)
    }

    /// Effectue une requête POST JSON limitée
    pub(crate) async fn post<B, T>(&self, url: &str, body: &B) -> Result<ApiResponse<T>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!("POST {}", url);
        let outcome = self
            .limiter
            .call(|| async move { Self::execute(self.client.post(url).json(body)).await })
            .await;
        ApiResponse::from_outcome(outcome)
    }

    async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<Option<T>> {
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Traite la réponse HTTP
    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
        let status = response.status();
        debug!("Response status: {}", status);

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("API error ({}): {}", status.as_u16(), error_text);
            return Err(AppleMusicError::from_status_code(status.as_u16(), error_text));
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text).map(Some).map_err(|e| {
            warn!("Failed to parse response: {}", e);
            AppleMusicError::Json(e)
        })
    }
}

/// Builder de [`AppleMusicApi`]
pub struct ApiBuilder {
    client: Option<Client>,
    api_base: String,
    search_base: String,
    authorization: String,
    media_user_token: String,
    cookies: String,
    user_agent: String,
    timeout: Duration,
    limiter: Option<Arc<RateLimitedClient>>,
}

impl Default for ApiBuilder {
    fn default() -> Self {
        Self {
            client: None,
            api_base: DEFAULT_API_BASE.to_string(),
            search_base: DEFAULT_SEARCH_BASE.to_string(),
            authorization: String::new(),
            media_user_token: String::new(),
            cookies: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            limiter: None,
        }
    }
}

impl ApiBuilder {
    /// Utilise un client HTTP déjà configuré (les en-têtes ne sont pas ajoutés)
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn search_base(mut self, url: impl Into<String>) -> Self {
        self.search_base = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bearer token du lecteur web (avec ou sans le préfixe `Bearer `)
    pub fn authorization(mut self, token: impl Into<String>) -> Self {
        self.authorization = token.into();
        self
    }

    pub fn media_user_token(mut self, token: impl Into<String>) -> Self {
        self.media_user_token = token.into();
        self
    }

    pub fn cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = cookies.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limiter(mut self, limiter: Arc<RateLimitedClient>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
        HeaderValue::from_str(value.trim()).map_err(|_| {
            AppleMusicError::Configuration(format!("Invalid characters in {}", name))
        })
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let token = self.authorization.trim();
        if !token.is_empty() {
            let bearer = if token.starts_with("Bearer ") {
                token.to_string()
            } else {
                format!("Bearer {}", token)
            };
            headers.insert(AUTHORIZATION, Self::header_value("authorization", &bearer)?);
        }
        if !self.media_user_token.trim().is_empty() {
            headers.insert(
                MEDIA_USER_TOKEN,
                Self::header_value("media user token", &self.media_user_token)?,
            );
        }
        if !self.cookies.trim().is_empty() {
            headers.insert(COOKIE, Self::header_value("cookies", &self.cookies)?);
        }

        headers.insert(REFERER, HeaderValue::from_static("https://music.apple.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://music.apple.com"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub fn build(self) -> Result<AppleMusicApi> {
        let client = match self.client.clone() {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .default_headers(self.default_headers()?)
                .build()?,
        };

        Ok(AppleMusicApi {
            client,
            api_base: self.api_base,
            search_base: self.search_base,
            limiter: self.limiter.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_creation() {
        let api = AppleMusicApi::builder()
            .api_base("http://localhost:1234/")
            .authorization("token")
            .build()
            .unwrap();
        assert_eq!(api.search_url("/search"), format!("{}/search", DEFAULT_SEARCH_BASE));
        assert_eq!(
            api.api_url("/v1/me/library/playlists"),
            "http://localhost:1234/v1/me/library/playlists"
        );
        assert_eq!(api.api_url("https://example.com/next"), "https://example.com/next");
    }

    #[test]
    fn test_invalid_header_is_a_configuration_error() {
        let result = AppleMusicApi::builder().cookies("bad\ncookie").build();
        assert!(matches!(result, Err(AppleMusicError::Configuration(_))));
    }

    #[test]
    fn test_response_classes() {
        let not_found: ApiResponse<()> =
            ApiResponse::from_outcome(Err(AppleMusicError::from_status_code(404, ""))).unwrap();
        assert_eq!(not_found, ApiResponse::NotFound);

        let forbidden: ApiResponse<()> =
            ApiResponse::from_outcome(Err(AppleMusicError::from_status_code(403, "no"))).unwrap();
        assert!(matches!(forbidden, ApiResponse::ClientError { status: 403, .. }));

        let server: ApiResponse<()> =
            ApiResponse::from_outcome(Err(AppleMusicError::from_status_code(502, "x"))).unwrap();
        assert!(matches!(server, ApiResponse::ServerError { status: 502, .. }));

        let empty: ApiResponse<()> = ApiResponse::from_outcome(Ok(None)).unwrap();
        assert!(empty.is_success());

        let io = ApiResponse::<()>::from_outcome(Err(AppleMusicError::Configuration("x".into())));
        assert!(io.is_err());
    }
}
