//! Structures de données manipulées pendant une conversion

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::Mutex;

/// Désérialiseur flexible pour les IDs qui peuvent être des strings ou des integers
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::custom("ID must be a string or number")),
    }
}

/// Échappe les apostrophes d'un champ texte avant comparaison.
///
/// Les espaces de début et de fin sont aussi retirés.
pub fn escape_apostrophes(value: &str) -> String {
    value.trim().replace('\'', "\\'")
}

/// Code de storefront Apple Music, toujours stocké en minuscules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Region(String);

impl Region {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Region {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Region> for String {
    fn from(value: Region) -> Self {
        value.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Une ligne de la playlist exportée
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTrack {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    /// Date de sortie telle qu'exportée (format libre)
    pub release_date: String,
    pub isrc: Option<String>,
}

impl SourceTrack {
    /// Copie dont les champs texte sont normalisés pour la comparaison
    pub fn normalized(&self) -> Self {
        Self {
            title: escape_apostrophes(&self.title),
            artist: escape_apostrophes(&self.artist),
            album: escape_apostrophes(&self.album),
            album_artist: escape_apostrophes(&self.album_artist),
            release_date: escape_apostrophes(&self.release_date),
            isrc: self
                .isrc
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    /// Ligne `title | artist | album` utilisée dans les logs et le fichier d'échecs
    pub fn summary(&self) -> String {
        format!("{} | {} | {}", self.title, self.artist, self.album)
    }
}

/// Un résultat de recherche dans le catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSong {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub track_name: String,
    /// Page de détail permettant de vérifier la date de sortie
    #[serde(default)]
    pub release_detail_url: Option<String>,
}

/// Voie par laquelle une piste a été trouvée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    /// Recherche exacte par ISRC
    Isrc,
    /// Recherche texte iTunes
    Text,
}

/// Résultat d'une résolution réussie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub song_id: String,
    pub method: MatchMethod,
}

/// Issue d'un ajout à la playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddOutcome {
    Ok,
    Duplicate,
    Error,
}

/// Identifiants présents dans la playlist et ajouts en cours
#[derive(Debug, Default)]
struct Membership {
    known: HashSet<String>,
    pending: HashSet<String>,
}

/// Playlist de destination et identifiants catalogue déjà présents.
///
/// Le verrou ne protège que la réservation et l'insertion d'un identifiant ;
/// il n'est jamais tenu pendant un appel réseau.
#[derive(Debug)]
pub struct DestinationPlaylist {
    pub id: String,
    pub name: String,
    membership: Mutex<Membership>,
}

impl DestinationPlaylist {
    pub fn new(id: impl Into<String>, name: impl Into<String>, known_ids: HashSet<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            membership: Mutex::new(Membership {
                known: known_ids,
                pending: HashSet::new(),
            }),
        }
    }

    pub async fn contains(&self, song_id: &str) -> bool {
        self.membership.lock().await.known.contains(song_id)
    }

    /// Réserve `song_id` pour un ajout.
    ///
    /// Retourne `false` si l'identifiant est déjà présent ou en cours d'ajout.
    pub async fn reserve(&self, song_id: &str) -> bool {
        let mut membership = self.membership.lock().await;
        if membership.known.contains(song_id) {
            return false;
        }
        membership.pending.insert(song_id.to_string())
    }

    /// Libère une réservation ; l'identifiant devient connu si l'ajout a réussi
    pub async fn release(&self, song_id: &str, added: bool) {
        let mut membership = self.membership.lock().await;
        membership.pending.remove(song_id);
        if added {
            membership.known.insert(song_id.to_string());
        }
    }
}

/// Statistiques d'une conversion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total: usize,
    pub converted: usize,
    pub failed: usize,
    pub isrc_based: usize,
    pub text_based: usize,
}

impl ConversionStats {
    /// Pourcentage de pistes converties (100 pour une playlist vide)
    pub fn converted_percentage(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            ((self.converted as f64 / self.total as f64) * 100.0).round() as usize
        }
    }
}

impl fmt::Display for ConversionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " - STAT REPORT -")?;
        writeln!(f, "Playlist Songs: {}", self.total)?;
        writeln!(f, "Converted Songs: {}", self.converted)?;
        writeln!(f, "Failed Songs: {}", self.failed)?;
        writeln!(f, "Playlist converted at {}%", self.converted_percentage())?;
        writeln!(f)?;
        writeln!(f, "Converted using ISRC: {}", self.isrc_based)?;
        write!(f, "Converted using text based search: {}", self.text_based)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_is_lowercased() {
        assert_eq!(Region::new(" FR ").as_str(), "fr");
        let region: Region = serde_json::from_str("\"US\"").unwrap();
        assert_eq!(region.as_str(), "us");
    }

    #[test]
    fn test_normalized_escapes_and_drops_blank_isrc() {
        let track = SourceTrack {
            title: "Don't Stop ".into(),
            isrc: Some("  ".into()),
            ..Default::default()
        };
        let normalized = track.normalized();
        assert_eq!(normalized.title, "Don\\'t Stop");
        assert_eq!(normalized.isrc, None);
    }

    #[test]
    fn test_escape_apostrophes_trims() {
        assert_eq!(escape_apostrophes("  L'Été  "), "L\\'Été");
        assert_eq!(escape_apostrophes("   "), "");
    }

    #[test]
    fn test_candidate_accepts_numeric_id() {
        let song: CandidateSong =
            serde_json::from_str(r#"{"id": 1440833098, "track_name": "So What"}"#).unwrap();
        assert_eq!(song.id, "1440833098");
        assert_eq!(song.album_name, "");
    }

    #[test]
    fn test_converted_percentage() {
        assert_eq!(ConversionStats::default().converted_percentage(), 100);
        let stats = ConversionStats {
            total: 3,
            converted: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.converted_percentage(), 67);
    }

    #[tokio::test]
    async fn test_reservation_blocks_concurrent_adds() {
        let playlist = DestinationPlaylist::new("p.1", "Road", HashSet::from(["1".to_string()]));

        assert!(!playlist.reserve("1").await);
        assert!(playlist.reserve("2").await);
        assert!(!playlist.reserve("2").await);
        assert!(!playlist.contains("2").await);

        playlist.release("2", false).await;
        assert!(playlist.reserve("2").await);
        playlist.release("2", true).await;
        assert!(playlist.contains("2").await);
        assert!(!playlist.reserve("2").await);
    }
}
