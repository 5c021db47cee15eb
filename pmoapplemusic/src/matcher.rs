//! Résolution d'une piste source vers un identifiant du catalogue
//!
//! Deux phases, la première qui aboutit l'emporte :
//!
//! 1. **ISRC** : recherche exacte, puis choix du candidat selon des règles
//!    ordonnées ([`IdentifierRule`]). Les règles sont évaluées dans l'ordre
//!    sur toute la liste : la première règle satisfaite par au moins un
//!    candidat désigne le gagnant (son premier candidat dans l'ordre).
//! 2. **Texte** : les variantes de requête iTunes sont essayées une à une ;
//!    pour chaque candidat, dans l'ordre, on accepte le premier qui satisfait
//!    une des [`TextRule`]. Une variante sans candidat acceptable passe la
//!    main à la suivante.
//!
//! L'identifiant retenu est ensuite remplacé par son équivalent régional
//! s'il en existe un.

use crate::api::catalog::{CatalogSearch, TextQuery};
use crate::models::{CandidateSong, MatchMethod, Region, ResolvedTrack, SourceTrack, escape_apostrophes};
use crate::oracle::DateOracle;
use std::sync::Arc;
use tracing::{debug, info};

/// Longueur du préfixe comparé pour les métadonnées tronquées ou localisées
const PREFIX_LENGTH: usize = 7;

/// Règles de sélection parmi les résultats d'une recherche ISRC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRule {
    /// Album et artiste de l'album identiques
    AlbumAndAlbumArtist,
    /// Album identique, artistes inclus l'un dans l'autre
    AlbumAndArtistOverlap,
    /// Album et artiste identiques sur leurs 7 premiers caractères
    TruncatedPrefix,
    /// Album identique seul
    AlbumOnly,
}

impl IdentifierRule {
    /// Ordre de priorité
    pub const ORDER: [IdentifierRule; 4] = [
        Self::AlbumAndAlbumArtist,
        Self::AlbumAndArtistOverlap,
        Self::TruncatedPrefix,
        Self::AlbumOnly,
    ];

    /// `track` doit être normalisée ([`SourceTrack::normalized`])
    pub fn matches(self, track: &SourceTrack, candidate: &CandidateSong) -> bool {
        let album = track.album.to_lowercase();
        let album_artist = track.album_artist.to_lowercase();
        let candidate_album = fold(&candidate.album_name);
        let candidate_artist = fold(&candidate.artist_name);

        match self {
            Self::AlbumAndAlbumArtist => candidate_album == album && candidate_artist == album_artist,
            Self::AlbumAndArtistOverlap => {
                candidate_album == album
                    && (candidate_artist.contains(&album_artist)
                        || album_artist.contains(&candidate_artist))
            }
            Self::TruncatedPrefix => {
                candidate_album.starts_with(&prefix(&album))
                    && candidate_artist.starts_with(&prefix(&album_artist))
            }
            Self::AlbumOnly => candidate_album == album,
        }
    }
}

/// Règles d'acceptation d'un résultat de recherche texte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRule {
    /// Titre, artiste et album identiques
    ExactTrackArtistAlbum,
    /// Date de sortie confirmée par l'oracle
    ReleaseDate,
    /// Titre et artiste identiques
    ExactTrackArtist,
    /// Titre identique, artistes égaux une fois les espaces retirés
    TrackAndCompactArtist,
    /// Titre et artiste inversés entre source et catalogue
    SwappedFields,
}

impl TextRule {
    /// Ordre de priorité
    pub const ORDER: [TextRule; 5] = [
        Self::ExactTrackArtistAlbum,
        Self::ReleaseDate,
        Self::ExactTrackArtist,
        Self::TrackAndCompactArtist,
        Self::SwappedFields,
    ];

    /// Évalue une règle portant uniquement sur les champs texte.
    ///
    /// [`TextRule::ReleaseDate`] nécessite l'oracle et vaut toujours `false` ici.
    pub fn matches_fields(self, track: &SourceTrack, candidate: &CandidateSong) -> bool {
        let title = track.title.to_lowercase();
        let artist = track.artist.to_lowercase();
        let candidate_track = fold(&candidate.track_name);
        let candidate_artist = fold(&candidate.artist_name);

        match self {
            Self::ExactTrackArtistAlbum => {
                candidate_track == title
                    && candidate_artist == artist
                    && fold(&candidate.album_name) == track.album.to_lowercase()
            }
            Self::ReleaseDate => false,
            Self::ExactTrackArtist => candidate_track == title && candidate_artist == artist,
            Self::TrackAndCompactArtist => {
                candidate_track == title && compact(&candidate_artist) == compact(&artist)
            }
            Self::SwappedFields => {
                candidate_artist == title && compact(&candidate_track) == compact(&artist)
            }
        }
    }
}

fn fold(value: &str) -> String {
    escape_apostrophes(value).to_lowercase()
}

fn compact(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn prefix(value: &str) -> String {
    value.chars().take(PREFIX_LENGTH).collect()
}

/// Choisit le candidat d'une recherche ISRC, `track` étant normalisée
pub fn select_by_identifier<'a>(
    track: &SourceTrack,
    candidates: &'a [CandidateSong],
) -> Option<(&'a CandidateSong, IdentifierRule)> {
    IdentifierRule::ORDER.iter().find_map(|&rule| {
        candidates
            .iter()
            .find(|candidate| rule.matches(track, candidate))
            .map(|candidate| (candidate, rule))
    })
}

/// Résolution piste source → identifiant catalogue
pub struct MatchResolver {
    catalog: Arc<dyn CatalogSearch>,
    oracle: Arc<dyn DateOracle>,
    region: Region,
}

impl MatchResolver {
    pub fn new(catalog: Arc<dyn CatalogSearch>, oracle: Arc<dyn DateOracle>, region: Region) -> Self {
        Self {
            catalog,
            oracle,
            region,
        }
    }

    /// Résout une piste ; `None` si aucune règle n'a trouvé de correspondance
    pub async fn resolve(&self, track: &SourceTrack) -> Option<ResolvedTrack> {
        let normalized = track.normalized();

        let (song_id, method) = match self.match_by_identifier(&normalized).await {
            Some(id) => (id, MatchMethod::Isrc),
            None => {
                info!(
                    "No result found for {} | {} with {}. Trying text based search...",
                    normalized.summary(),
                    normalized.release_date,
                    normalized.isrc.as_deref().unwrap_or("no ISRC")
                );
                let id = self.match_by_text(track, &normalized).await?;
                (id, MatchMethod::Text)
            }
        };

        let equivalent = self.catalog.resolve_equivalent(&song_id, &self.region).await;
        if equivalent != song_id {
            info!("{} switched to equivalent -> {}", song_id, equivalent);
        }

        Some(ResolvedTrack {
            song_id: equivalent,
            method,
        })
    }

    async fn match_by_identifier(&self, track: &SourceTrack) -> Option<String> {
        let isrc = track.isrc.as_deref()?;
        let candidates = self.catalog.search_by_identifier(isrc, &self.region).await;

        let (candidate, rule) = select_by_identifier(track, &candidates)?;
        debug!(isrc, song_id = %candidate.id, ?rule, "ISRC match");
        Some(candidate.id.clone())
    }

    async fn match_by_text(&self, raw: &SourceTrack, track: &SourceTrack) -> Option<String> {
        let variants = TextQuery::variants(raw.title.trim(), raw.artist.trim(), raw.album.trim());

        // Une variante dont aucun candidat n'est acceptable cède la place
        // aux suivantes.
        let mut next = 0;
        while let Some((index, candidates)) = self
            .catalog
            .search_by_text(&variants[next..], &self.region)
            .await
        {
            if let Some((candidate, rule)) = self.select_by_text(track, &candidates).await {
                debug!(song_id = %candidate.id, ?rule, "Text match");
                return Some(candidate.id.clone());
            }
            next += index + 1;
        }

        None
    }

    /// Premier candidat (dans l'ordre) satisfaisant une des règles texte
    async fn select_by_text<'a>(
        &self,
        track: &SourceTrack,
        candidates: &'a [CandidateSong],
    ) -> Option<(&'a CandidateSong, TextRule)> {
        for candidate in candidates {
            for rule in TextRule::ORDER {
                let holds = match rule {
                    TextRule::ReleaseDate => self.release_date_matches(track, candidate).await,
                    _ => rule.matches_fields(track, candidate),
                };
                if holds {
                    return Some((candidate, rule));
                }
            }
        }
        None
    }

    async fn release_date_matches(&self, track: &SourceTrack, candidate: &CandidateSong) -> bool {
        match candidate.release_detail_url.as_deref() {
            Some(url) if !url.is_empty() && !track.release_date.is_empty() => {
                self.oracle.verify_release_date(url, &track.release_date).await
            }
            _ => false,
        }
    }
}
