//! Gestion des erreurs pour le convertisseur Apple Music

use thiserror::Error;

/// Type Result personnalisé pour pmoapplemusic
pub type Result<T> = std::result::Result<T, AppleMusicError>;

/// Erreurs possibles lors d'une conversion de playlist
#[derive(Error, Debug)]
pub enum AppleMusicError {
    /// Credentials refusés par Apple Music (401/403)
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Requête mal formée (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Ressource non trouvée (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Quota dépassé côté serveur (429)
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Autre statut HTTP en erreur
    #[error("Apple Music API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Erreur de transport HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Erreur de parsing YAML (configuration)
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Erreur d'entrée/sortie
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration manquante ou invalide
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fichier CSV dans un format non reconnu
    #[error("CSV format error: {0}")]
    CsvFormat(String),

    /// Réponse inattendue de l'API
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl AppleMusicError {
    /// Crée une erreur API depuis un code de statut HTTP et un message
    pub fn from_status_code(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::BadRequest(message),
            401 | 403 => Self::Unauthorized { status, message },
            404 => Self::NotFound(message),
            429 => Self::RateLimited(message),
            _ => Self::Api { status, message },
        }
    }

    /// Indique si un nouvel essai peut être tenté.
    ///
    /// "not found" et "bad request" sont définitifs dès le premier essai,
    /// tout comme un corps de réponse illisible.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::BadRequest(_) | Self::Json(_))
    }

    /// Vérifie si l'erreur doit interrompre toute la conversion
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Unauthorized { .. } | Self::BadRequest(_)
        )
    }

    /// Vérifie si l'erreur est une erreur de credentials (401/403)
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_code() {
        assert!(matches!(
            AppleMusicError::from_status_code(400, "x"),
            AppleMusicError::BadRequest(_)
        ));
        assert!(AppleMusicError::from_status_code(401, "x").is_auth_error());
        assert!(AppleMusicError::from_status_code(403, "x").is_auth_error());
        assert!(matches!(
            AppleMusicError::from_status_code(404, "x"),
            AppleMusicError::NotFound(_)
        ));
        assert!(matches!(
            AppleMusicError::from_status_code(503, "x"),
            AppleMusicError::Api { status: 503, .. }
        ));
    }

    #[test]
    fn test_retry_classification() {
        assert!(!AppleMusicError::from_status_code(404, "gone").is_retryable());
        assert!(!AppleMusicError::from_status_code(400, "bad").is_retryable());
        assert!(AppleMusicError::from_status_code(500, "boom").is_retryable());
        assert!(AppleMusicError::from_status_code(429, "slow down").is_retryable());

        let malformed = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!AppleMusicError::Json(malformed).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AppleMusicError::Configuration("missing".into()).is_fatal());
        assert!(AppleMusicError::from_status_code(403, "forbidden").is_fatal());
        assert!(AppleMusicError::from_status_code(400, "bad").is_fatal());
        assert!(!AppleMusicError::from_status_code(502, "gateway").is_fatal());
        assert!(!AppleMusicError::CsvFormat("header".into()).is_fatal());
    }
}
