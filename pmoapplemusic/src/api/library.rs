//! Accès à la bibliothèque de l'utilisateur (playlists)

use super::{AppleMusicApi, ApiResponse};
use crate::error::{AppleMusicError, Result};
use crate::models::{AddOutcome, DestinationPlaylist};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LIBRARY_PLAYLISTS_PATH: &str = "/v1/me/library/playlists";

/// Description donnée aux playlists créées
pub const PLAYLIST_DESCRIPTION: &str = "A new playlist created via API using pmoapplemusic";

/// Délai laissé à Apple Music après une création de playlist
const CREATION_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Réponse paginée de la bibliothèque
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct PagedResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LibraryPlaylistResource {
    #[serde(deserialize_with = "crate::models::deserialize_id")]
    id: String,
    #[serde(default)]
    attributes: Option<LibraryPlaylistAttributes>,
}

#[derive(Debug, Deserialize)]
struct LibraryPlaylistAttributes {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct LibraryTrackResource {
    #[serde(default)]
    attributes: Option<LibraryTrackAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryTrackAttributes {
    #[serde(default)]
    play_params: Option<PlayParams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayParams {
    #[serde(default)]
    catalog_id: Option<String>,
}

/// Corps d'erreur renvoyé par l'API (`errors[]`)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    message_for_display: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Serialize)]
struct TrackReference<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Playlist de la bibliothèque utilisateur
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryPlaylist {
    pub id: String,
    pub name: String,
}

/// Gestion des playlists de destination
pub struct PlaylistManager {
    api: Arc<AppleMusicApi>,
}

impl PlaylistManager {
    pub fn new(api: Arc<AppleMusicApi>) -> Self {
        Self { api }
    }

    /// Liste toutes les playlists de l'utilisateur en suivant la pagination
    pub async fn list_playlists(&self) -> Result<Vec<LibraryPlaylist>> {
        let mut playlists = Vec::new();
        let mut next = Some(LIBRARY_PLAYLISTS_PATH.to_string());

        while let Some(path) = next.take() {
            let url = self.api.api_url(&path);
            match self
                .api
                .get::<PagedResponse<LibraryPlaylistResource>>(&url, &[])
                .await?
            {
                ApiResponse::Data(page) => {
                    playlists.extend(page.data.into_iter().map(|p| LibraryPlaylist {
                        id: p.id,
                        name: p.attributes.map(|a| a.name).unwrap_or_default(),
                    }));
                    next = page.next;
                }
                ApiResponse::Empty | ApiResponse::NotFound => {}
                ApiResponse::ClientError { status, message } => {
                    return Err(AppleMusicError::from_status_code(status, message));
                }
                ApiResponse::ServerError { status, message } => {
                    return Err(AppleMusicError::Api { status, message });
                }
            }
        }

        Ok(playlists)
    }

    /// Retourne l'ID de la playlist `name`, en la créant si besoin.
    ///
    /// # Errors
    ///
    /// Toute erreur est fatale pour la conversion ; en particulier
    /// `Unauthorized` (401/403) et `BadRequest` (400).
    pub async fn get_or_create(&self, name: &str) -> Result<String> {
        match self.list_playlists().await {
            Ok(playlists) => {
                if let Some(existing) = playlists.into_iter().find(|p| p.name == name) {
                    info!("Playlist {} already exists!", name);
                    return Ok(existing.id);
                }
            }
            Err(e) if e.is_auth_error() => return Err(e),
            Err(e) => warn!("Unable to list playlists ({}), trying to create {}", e, name),
        }

        self.create_playlist(name).await
    }

    /// Crée une playlist vide
    pub async fn create_playlist(&self, name: &str) -> Result<String> {
        let url = self.api.api_url(LIBRARY_PLAYLISTS_PATH);
        let body = json!({
            "attributes": {
                "name": name,
                "description": PLAYLIST_DESCRIPTION,
            }
        });

        match self
            .api
            .post::<_, PagedResponse<LibraryPlaylistResource>>(&url, &body)
            .await?
        {
            ApiResponse::Data(created) => {
                tokio::time::sleep(CREATION_SETTLE_DELAY).await;
                let id = created
                    .data
                    .into_iter()
                    .next()
                    .map(|p| p.id)
                    .ok_or_else(|| {
                        AppleMusicError::UnexpectedResponse(format!(
                            "No playlist id returned while creating {}",
                            name
                        ))
                    })?;
                info!("Playlist {} created with id {}", name, id);
                Ok(id)
            }
            ApiResponse::ClientError {
                status: 400,
                message,
            } => {
                Self::log_bad_request(name, &message);
                Err(AppleMusicError::BadRequest(message))
            }
            ApiResponse::ClientError { status, message } if status == 401 || status == 403 => {
                error!(
                    "Error {}: Apple Music rejected the credentials. Check the bearer token, media user token and session cookies.",
                    status
                );
                Err(AppleMusicError::Unauthorized { status, message })
            }
            ApiResponse::Empty => Err(AppleMusicError::UnexpectedResponse(format!(
                "Empty response while creating playlist {}",
                name
            ))),
            ApiResponse::NotFound => Err(AppleMusicError::NotFound(format!(
                "Library endpoint not found while creating playlist {}",
                name
            ))),
            ApiResponse::ClientError { status, message }
            | ApiResponse::ServerError { status, message } => {
                error!("Error {} while creating playlist {}!", status, name);
                Err(AppleMusicError::Api { status, message })
            }
        }
    }

    fn log_bad_request(name: &str, message: &str) {
        match serde_json::from_str::<ApiErrorBody>(message) {
            Ok(body) if !body.errors.is_empty() => {
                for entry in body.errors {
                    error!(
                        "Error 400: Bad Request. {}: {}",
                        entry.code, entry.message_for_display
                    );
                    error!("{}: {}", entry.title, entry.detail);
                }
            }
            _ => error!("Error 400: 'Bad Request' while creating playlist {}!", name),
        }
    }

    /// Identifiants catalogue déjà présents dans la playlist.
    ///
    /// Une playlist introuvable (tout juste créée) est considérée vide.
    pub async fn list_catalog_ids(&self, playlist_id: &str) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        let mut next = Some(format!("{}/{}/tracks", LIBRARY_PLAYLISTS_PATH, playlist_id));

        while let Some(path) = next.take() {
            let url = self.api.api_url(&path);
            match self
                .api
                .get::<PagedResponse<LibraryTrackResource>>(&url, &[])
                .await?
            {
                ApiResponse::Data(page) => {
                    ids.extend(page.data.into_iter().filter_map(|track| {
                        track.attributes?.play_params?.catalog_id
                    }));
                    next = page.next;
                }
                ApiResponse::Empty | ApiResponse::NotFound => {}
                ApiResponse::ClientError { status, message }
                | ApiResponse::ServerError { status, message } => {
                    error!("Error {} while getting playlist {}!", status, playlist_id);
                    return Err(AppleMusicError::from_status_code(status, message));
                }
            }
        }

        debug!("Playlist {} holds {} catalog tracks", playlist_id, ids.len());
        Ok(ids)
    }

    /// Ajoute `song_id` à `playlist`.
    ///
    /// Retourne `Duplicate` sans appel réseau si le titre est déjà présent
    /// ou en cours d'ajout par une autre tâche. Ne lève jamais d'erreur.
    pub async fn add_song(&self, song_id: &str, playlist: &DestinationPlaylist) -> AddOutcome {
        if !playlist.reserve(song_id).await {
            info!("Song {} already in playlist {}!", song_id, playlist.name);
            return AddOutcome::Duplicate;
        }

        let outcome = self.post_track(song_id, &playlist.id).await;
        playlist.release(song_id, outcome == AddOutcome::Ok).await;
        outcome
    }

    async fn post_track(&self, song_id: &str, playlist_id: &str) -> AddOutcome {
        let url = self
            .api
            .api_url(&format!("{}/{}/tracks", LIBRARY_PLAYLISTS_PATH, playlist_id));
        let body = json!({
            "data": [TrackReference { id: song_id, kind: "songs" }]
        });

        match self.api.post::<_, serde_json::Value>(&url, &body).await {
            Ok(response) if response.is_success() => {
                info!("Song {} added successfully!", song_id);
                AddOutcome::Ok
            }
            Ok(ApiResponse::ClientError { status, message })
            | Ok(ApiResponse::ServerError { status, message }) => {
                error!("Error {} while adding song {}: {}", status, song_id, message);
                AddOutcome::Error
            }
            Ok(_) => {
                error!("Playlist {} not found while adding song {}", playlist_id, song_id);
                AddOutcome::Error
            }
            Err(e) => {
                error!(
                    "HOST ERROR: Apple Music might have blocked the connection during the add of {}: {}",
                    song_id, e
                );
                AddOutcome::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_library_tracks_keeps_catalog_ids_only() {
        let json = r#"{"data": [
            {"id": "i.1", "attributes": {"playParams": {"id": "i.1", "catalogId": "111"}}},
            {"id": "i.2", "attributes": {"playParams": {"id": "i.2"}}},
            {"id": "i.3"}
        ], "next": "/v1/me/library/playlists/p.1/tracks?offset=100"}"#;
        let page: PagedResponse<LibraryTrackResource> = serde_json::from_str(json).unwrap();
        assert!(page.next.is_some());
        let ids: Vec<_> = page
            .data
            .into_iter()
            .filter_map(|t| t.attributes?.play_params?.catalog_id)
            .collect();
        assert_eq!(ids, vec!["111".to_string()]);
    }

    #[test]
    fn test_parse_page_without_data() {
        let page: PagedResponse<LibraryPlaylistResource> =
            serde_json::from_str(r#"{"next": null}"#).unwrap();
        assert!(page.data.is_empty());
        assert!(page.next.is_none());

        let page: PagedResponse<LibraryPlaylistResource> =
            serde_json::from_str(r#"{"data": [{"id": 7, "attributes": {"name": "Road"}}]}"#)
                .unwrap();
        assert_eq!(page.data[0].id, "7");
    }

    #[test]
    fn test_add_body_shape() {
        let body = json!({ "data": [TrackReference { id: "42", kind: "songs" }] });
        assert_eq!(body, json!({ "data": [{ "id": "42", "type": "songs" }] }));
    }
}
