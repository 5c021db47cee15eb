//! Recherche dans le catalogue (ISRC, texte iTunes, équivalents régionaux)

use super::{AppleMusicApi, ApiResponse};
use crate::models::{CandidateSong, Region};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Nombre de résultats demandés à l'API iTunes Search
pub const DEFAULT_SEARCH_LIMIT: u32 = 15;

/// Réponse des endpoints `/v1/catalog/{storefront}/songs`
#[derive(Debug, Deserialize)]
struct SongsResponse {
    #[serde(default)]
    data: Vec<SongResource>,
}

#[derive(Debug, Deserialize)]
struct SongResource {
    #[serde(deserialize_with = "crate::models::deserialize_id")]
    id: String,
    #[serde(default)]
    attributes: Option<SongAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SongAttributes {
    #[serde(default)]
    album_name: String,
    #[serde(default)]
    artist_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: Option<String>,
}

/// Réponse de l'API iTunes Search
#[derive(Debug, Deserialize)]
struct ItunesSearchResponse {
    #[serde(default)]
    results: Vec<ItunesResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItunesResult {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    track_id: Option<String>,
    #[serde(default)]
    track_name: Option<String>,
    #[serde(default)]
    artist_name: Option<String>,
    #[serde(default)]
    collection_name: Option<String>,
    #[serde(default)]
    track_view_url: Option<String>,
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    crate::models::deserialize_id(deserializer).map(Some)
}

impl From<SongResource> for CandidateSong {
    fn from(song: SongResource) -> Self {
        let attributes = song.attributes.unwrap_or(SongAttributes {
            album_name: String::new(),
            artist_name: String::new(),
            name: String::new(),
            url: None,
        });
        CandidateSong {
            id: song.id,
            album_name: attributes.album_name,
            artist_name: attributes.artist_name,
            track_name: attributes.name,
            release_detail_url: attributes.url,
        }
    }
}

impl ItunesResult {
    fn into_candidate(self) -> Option<CandidateSong> {
        Some(CandidateSong {
            id: self.track_id?,
            album_name: self.collection_name.unwrap_or_default(),
            artist_name: self.artist_name.unwrap_or_default(),
            track_name: self.track_name.unwrap_or_default(),
            release_detail_url: self.track_view_url,
        })
    }
}

/// Une variante de requête texte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQuery {
    pub term: String,
    pub artist_term: Option<String>,
    pub album_term: Option<String>,
}

impl TextQuery {
    /// Variantes dans l'ordre d'essai :
    /// titre+artiste+album, titre+artiste, titre+album, titre seul
    pub fn variants(title: &str, artist: &str, album: &str) -> Vec<TextQuery> {
        let query = |artist: Option<&str>, album: Option<&str>| TextQuery {
            term: title.to_string(),
            artist_term: artist.map(str::to_string),
            album_term: album.map(str::to_string),
        };
        vec![
            query(Some(artist), Some(album)),
            query(Some(artist), None),
            query(None, Some(album)),
            query(None, None),
        ]
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.term.as_str()];
        parts.extend(self.artist_term.as_deref());
        parts.extend(self.album_term.as_deref());
        parts.join(" + ")
    }
}

/// Opérations de recherche dans le catalogue de destination.
///
/// Aucune de ces opérations n'échoue : les erreurs sont journalisées et
/// transformées en résultat vide (ou en identifiant inchangé).
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Recherche exacte par ISRC
    async fn search_by_identifier(&self, isrc: &str, region: &Region) -> Vec<CandidateSong>;

    /// Exécute une seule variante de recherche texte
    async fn search_text(&self, query: &TextQuery, region: &Region) -> Vec<CandidateSong>;

    /// Premier jeu de résultats non vide parmi les variantes, avec la
    /// position de la variante qui l'a produit
    async fn search_by_text(
        &self,
        queries: &[TextQuery],
        region: &Region,
    ) -> Option<(usize, Vec<CandidateSong>)> {
        for (index, query) in queries.iter().enumerate() {
            let results = self.search_text(query, region).await;
            if !results.is_empty() {
                return Some((index, results));
            }
        }
        None
    }

    /// Identifiant équivalent dans la région, ou l'identifiant d'origine
    async fn resolve_equivalent(&self, song_id: &str, region: &Region) -> String;
}

/// Recherche catalogue adossée à l'API Apple Music / iTunes
pub struct CatalogSearchService {
    api: Arc<AppleMusicApi>,
    search_limit: u32,
}

impl CatalogSearchService {
    pub fn new(api: Arc<AppleMusicApi>) -> Self {
        Self {
            api,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_search_limit(mut self, limit: u32) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    fn songs_url(&self, region: &Region) -> String {
        self.api
            .api_url(&format!("/v1/catalog/{}/songs", region.as_str()))
    }
}

#[async_trait]
impl CatalogSearch for CatalogSearchService {
    async fn search_by_identifier(&self, isrc: &str, region: &Region) -> Vec<CandidateSong> {
        debug!("Searching catalog by ISRC {}", isrc);
        let url = self.songs_url(region);
        let params = [("filter[isrc]", isrc)];

        match self.api.get::<SongsResponse>(&url, &params).await {
            Ok(ApiResponse::Data(response)) => response
                .data
                .into_iter()
                .map(CandidateSong::from)
                .collect(),
            Ok(ApiResponse::Empty) | Ok(ApiResponse::NotFound) => Vec::new(),
            Ok(ApiResponse::ClientError { status, message })
            | Ok(ApiResponse::ServerError { status, message }) => {
                error!(
                    "Error {} while searching by ISRC {}: {}",
                    status, isrc, message
                );
                Vec::new()
            }
            Err(e) => {
                error!("An error occurred with the ISRC based search request: {}", e);
                Vec::new()
            }
        }
    }

    async fn search_text(&self, query: &TextQuery, region: &Region) -> Vec<CandidateSong> {
        let url = self.api.search_url("/search");
        let limit = self.search_limit.to_string();

        let mut params = vec![
            ("country", region.as_str()),
            ("media", "music"),
            ("entity", "song"),
            ("limit", limit.as_str()),
            ("term", query.term.as_str()),
        ];
        if let Some(artist) = query.artist_term.as_deref() {
            params.push(("artistTerm", artist));
        }
        if let Some(album) = query.album_term.as_deref() {
            params.push(("albumTerm", album));
        }

        match self.api.get::<ItunesSearchResponse>(&url, &params).await {
            Ok(ApiResponse::Data(response)) => response
                .results
                .into_iter()
                .filter_map(ItunesResult::into_candidate)
                .collect(),
            Ok(ApiResponse::Empty) => Vec::new(),
            Ok(ApiResponse::NotFound) => {
                info!("404 Not Found for text search '{}', skipping", query.describe());
                Vec::new()
            }
            Ok(ApiResponse::ClientError { status, message })
            | Ok(ApiResponse::ServerError { status, message }) => {
                warn!(
                    "Error {} during text search '{}': {}",
                    status,
                    query.describe(),
                    message
                );
                Vec::new()
            }
            Err(e) => {
                error!("Error searching by text '{}': {}", query.describe(), e);
                Vec::new()
            }
        }
    }

    async fn resolve_equivalent(&self, song_id: &str, region: &Region) -> String {
        let url = self.songs_url(region);
        let params = [("filter[equivalents]", song_id)];

        match self.api.get::<SongsResponse>(&url, &params).await {
            Ok(ApiResponse::Data(response)) => response
                .data
                .into_iter()
                .next()
                .map(|song| song.id)
                .unwrap_or_else(|| song_id.to_string()),
            Ok(_) => song_id.to_string(),
            Err(e) => {
                error!("Error fetching equivalent song ID for {}: {}", song_id, e);
                song_id.to_string()
            }
        }
    }
}
