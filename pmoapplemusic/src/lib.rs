//! # pmoapplemusic - Conversion de playlists vers Apple Music
//!
//! Cette crate transfère des playlists exportées (CSV Exportify) vers la
//! bibliothèque Apple Music de l'utilisateur, en respectant le quota d'appels
//! imposé par l'API web.
//!
//! ## Vue d'ensemble
//!
//! Pour chaque piste source :
//! - recherche exacte par ISRC, puis recherche texte iTunes en repli ;
//! - choix du candidat par des règles ordonnées ([`matcher`]) ;
//! - remplacement par l'équivalent régional éventuel ;
//! - ajout idempotent à la playlist de destination.
//!
//! Tous les appels réseau passent par un [`RateLimitedClient`] partagé
//! (seau à jetons + retries avec backoff exponentiel).
//!
//! ## Architecture
//!
//! - `limiter` : débit et retries
//! - `api` : couche HTTP, recherche catalogue, playlists de la bibliothèque
//! - `matcher` : résolution d'une piste source
//! - `oracle` : vérification de la date de sortie sur la page de détail
//! - `pipeline` : traitement par lots, pacing et statistiques
//! - `source` / `failures` : lecture des CSV, journal des échecs
//! - `config` : configuration YAML + variables d'environnement
//!
//! ## Structure des modules
//!
//! ```text
//! pmoapplemusic/
//! ├── src/
//! │   ├── lib.rs              # Module principal (ce fichier)
//! │   ├── main.rs             # Binaire en ligne de commande
//! │   ├── api/
//! │   │   ├── mod.rs          # Client HTTP et classes de réponse
//! │   │   ├── catalog.rs      # Recherche dans le catalogue
//! │   │   └── library.rs      # Playlists de l'utilisateur
//! │   ├── config.rs           # Chargement de la configuration
//! │   ├── error.rs            # Gestion des erreurs
//! │   ├── failures.rs         # Fichiers <playlist>_noresult.txt
//! │   ├── limiter.rs          # Seau à jetons et retries
//! │   ├── matcher.rs          # Règles de correspondance
//! │   ├── models.rs           # Structures de données
//! │   ├── oracle.rs           # Vérification des dates de sortie
//! │   ├── pipeline.rs         # Orchestration d'une conversion
//! │   └── source.rs           # Lecture des exports CSV
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmoapplemusic::{ConversionPipeline, ConverterConfig, FileFailureSink, source};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConverterConfig::load(None)?;
//!     config.validate()?;
//!
//!     let failures = Arc::new(FileFailureSink::new(config.failure_dir()));
//!     let pipeline = ConversionPipeline::from_config(&config, failures)?;
//!
//!     let path = "my_playlist.csv";
//!     let tracks = source::read_csv(path)?;
//!     let stats = pipeline
//!         .run(&source::playlist_name_from_path(path), &tracks)
//!         .await?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```
//!
//! ## Gestion des erreurs
//!
//! Seules les erreurs de configuration, de credentials (401/403) et de
//! création de playlist (400) interrompent une conversion. Les échecs
//! propres à une piste sont comptés dans les [`ConversionStats`] et
//! consignés dans le journal des échecs.
//!
//! ```rust,ignore
//! match pipeline.run("Jazz", &tracks).await {
//!     Ok(stats) => println!("{}", stats),
//!     Err(AppleMusicError::Unauthorized { status, .. }) => eprintln!("credentials refused ({status})"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod failures;
pub mod limiter;
pub mod matcher;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod source;

pub use api::catalog::{CatalogSearch, CatalogSearchService, TextQuery};
pub use api::library::PlaylistManager;
pub use api::{AppleMusicApi, ApiResponse};
pub use config::ConverterConfig;
pub use error::{AppleMusicError, Result};
pub use failures::{FailureReason, FailureSink, FileFailureSink};
pub use limiter::{RateLimitedClient, RateLimiter, RetryPolicy};
pub use matcher::MatchResolver;
pub use models::{
    AddOutcome, CandidateSong, ConversionStats, DestinationPlaylist, MatchMethod, Region,
    ResolvedTrack, SourceTrack,
};
pub use oracle::{DateOracle, HtmlDateOracle};
pub use pipeline::{ConversionPipeline, PipelineState};
