//! Orchestration d'une conversion de playlist
//!
//! Les pistes sont traitées par lots de taille fixe, dans l'ordre de la
//! source. Toutes les pistes d'un lot sont lancées ensemble et le lot n'est
//! terminé que lorsque chacune a abouti, quelle que soit son issue. Un délai
//! de pacing sépare deux lots et précède chaque ajout à la playlist.

use crate::api::AppleMusicApi;
use crate::api::catalog::CatalogSearchService;
use crate::api::library::PlaylistManager;
use crate::config::{ConverterConfig, MIN_DELAY_SECONDS};
use crate::error::Result;
use crate::failures::{FailureReason, FailureSink, failure_line};
use crate::matcher::MatchResolver;
use crate::models::{AddOutcome, ConversionStats, DestinationPlaylist, MatchMethod, SourceTrack};
use crate::oracle::HtmlDateOracle;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Étapes d'une exécution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initializing,
    ResolvingPlaylist,
    ProcessingBatches,
    Completed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::ResolvingPlaylist => "resolving playlist",
            Self::ProcessingBatches => "processing batches",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Issue du traitement d'une piste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Added(MatchMethod),
    /// Déjà présente avant l'ajout (vérifiée après résolution de l'équivalent)
    AlreadyPresent,
    /// Refusée par le garde de `add_song`
    Duplicate,
    NotFound,
    AddFailed,
}

impl RowOutcome {
    fn failure_reason(self) -> Option<FailureReason> {
        match self {
            Self::NotFound => Some(FailureReason::NotFound),
            Self::AddFailed => Some(FailureReason::UnableToAdd),
            _ => None,
        }
    }
}

/// Compteurs partagés par les tâches d'un lot
struct StatsRecorder {
    total: usize,
    converted: AtomicUsize,
    failed: AtomicUsize,
    isrc_based: AtomicUsize,
    text_based: AtomicUsize,
}

impl StatsRecorder {
    fn new(total: usize) -> Self {
        Self {
            total,
            converted: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            isrc_based: AtomicUsize::new(0),
            text_based: AtomicUsize::new(0),
        }
    }

    fn record(&self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Added(method) => {
                self.converted.fetch_add(1, Ordering::Relaxed);
                let counter = match method {
                    MatchMethod::Isrc => &self.isrc_based,
                    MatchMethod::Text => &self.text_based,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            RowOutcome::AlreadyPresent
            | RowOutcome::Duplicate
            | RowOutcome::NotFound
            | RowOutcome::AddFailed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> ConversionStats {
        ConversionStats {
            total: self.total,
            converted: self.converted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            isrc_based: self.isrc_based.load(Ordering::Relaxed),
            text_based: self.text_based.load(Ordering::Relaxed),
        }
    }
}

/// Conversion d'une playlist source vers une playlist Apple Music
pub struct ConversionPipeline {
    resolver: MatchResolver,
    playlists: PlaylistManager,
    failures: Arc<dyn FailureSink>,
    batch_size: usize,
    delay: Duration,
}

impl ConversionPipeline {
    /// `batch_size` vaut au moins 1 et `delay` au moins 0.5 s
    pub fn new(
        resolver: MatchResolver,
        playlists: PlaylistManager,
        failures: Arc<dyn FailureSink>,
        batch_size: usize,
        delay: Duration,
    ) -> Self {
        Self {
            resolver,
            playlists,
            failures,
            batch_size: batch_size.max(1),
            delay: delay.max(Duration::from_secs_f64(MIN_DELAY_SECONDS)),
        }
    }

    /// Assemble tous les services à partir de la configuration.
    ///
    /// Un seul [`RateLimitedClient`](crate::limiter::RateLimitedClient) est
    /// partagé par l'API, la recherche et l'oracle de date.
    pub fn from_config(config: &ConverterConfig, failures: Arc<dyn FailureSink>) -> Result<Self> {
        let limiter = Arc::new(config.rate_limited_client());
        let api: Arc<AppleMusicApi> = Arc::new(config.build_api(limiter.clone())?);

        let catalog = Arc::new(
            CatalogSearchService::new(api.clone()).with_search_limit(config.conversion.search_limit),
        );
        let oracle = Arc::new(HtmlDateOracle::new(limiter, config.request_timeout())?);
        let resolver = MatchResolver::new(catalog, oracle, config.region());

        Ok(Self::new(
            resolver,
            PlaylistManager::new(api),
            failures,
            config.batch_size(),
            config.delay(),
        ))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn advance(&self, state: &mut PipelineState, next: PipelineState) {
        debug!("Pipeline {} -> {}", state, next);
        *state = next;
    }

    /// Convertit `tracks` dans la playlist `name`.
    ///
    /// # Errors
    ///
    /// Seules les erreurs de résolution de la playlist (création refusée,
    /// credentials invalides, membres illisibles) interrompent l'exécution ;
    /// aucune statistique n'est alors produite.
    pub async fn run(&self, name: &str, tracks: &[SourceTrack]) -> Result<ConversionStats> {
        let mut state = PipelineState::Initializing;
        info!(playlist = name, tracks = tracks.len(), "Processing playlist");

        self.advance(&mut state, PipelineState::ResolvingPlaylist);
        let playlist_id = self.playlists.get_or_create(name).await?;
        let known_ids = self.playlists.list_catalog_ids(&playlist_id).await?;
        let playlist = DestinationPlaylist::new(playlist_id, name, known_ids);

        self.advance(&mut state, PipelineState::ProcessingBatches);
        let stats = StatsRecorder::new(tracks.len());
        let batch_count = tracks.len().div_ceil(self.batch_size);

        for (index, batch) in tracks.chunks(self.batch_size).enumerate() {
            let started = Instant::now();
            let offset = index * self.batch_size;
            debug!("Batch {}/{} ({} tracks)", index + 1, batch_count, batch.len());

            join_all(batch.iter().enumerate().map(|(position, track)| {
                self.process_row(offset + position + 1, track, &playlist, &stats)
            }))
            .await;

            if let Some(wait) = self.delay.checked_sub(started.elapsed()) {
                sleep(wait).await;
            }
        }

        self.advance(&mut state, PipelineState::Completed);
        let stats = stats.snapshot();
        info!(
            playlist = name,
            converted = stats.converted,
            failed = stats.failed,
            "Playlist processed"
        );
        Ok(stats)
    }

    async fn process_row(
        &self,
        number: usize,
        track: &SourceTrack,
        playlist: &DestinationPlaylist,
        stats: &StatsRecorder,
    ) {
        let outcome = self.convert_row(number, track, playlist).await;

        if let Some(reason) = outcome.failure_reason() {
            self.failures
                .append_failure(&playlist.name, &failure_line(track, reason))
                .await;
        }
        stats.record(outcome);
    }

    /// Résolution, vérification d'appartenance puis ajout d'une piste
    async fn convert_row(
        &self,
        number: usize,
        track: &SourceTrack,
        playlist: &DestinationPlaylist,
    ) -> RowOutcome {
        let Some(resolved) = self.resolver.resolve(track).await else {
            info!("N°{} | {} => NOT FOUND", number, track.summary());
            return RowOutcome::NotFound;
        };
        info!("N°{} | {} => {}", number, track.summary(), resolved.song_id);

        if playlist.contains(&resolved.song_id).await {
            info!(
                "Song {} already in playlist {}!",
                resolved.song_id, playlist.name
            );
            return RowOutcome::AlreadyPresent;
        }

        sleep(self.delay).await;

        match self.playlists.add_song(&resolved.song_id, playlist).await {
            AddOutcome::Ok => RowOutcome::Added(resolved.method),
            AddOutcome::Duplicate => RowOutcome::Duplicate,
            AddOutcome::Error => RowOutcome::AddFailed,
        }
    }
}
