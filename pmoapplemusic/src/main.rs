//! Binaire `pmoapplemusic` : convertit un export CSV, ou tous les exports
//! d'un répertoire, en playlists Apple Music.

use anyhow::{Context, bail};
use clap::Parser;
use pmoapplemusic::{AppleMusicError, ConversionPipeline, ConverterConfig, FileFailureSink, source};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pmoapplemusic")]
#[command(about = "Convert Exportify CSV playlists into Apple Music library playlists")]
struct Args {
    /// Fichier CSV ou répertoire contenant des fichiers CSV
    path: PathBuf,

    /// Répertoire contenant config.yaml
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ConverterConfig::load(args.config_dir.as_deref())
        .context("Unable to load configuration")?;
    config.validate()?;

    let files = if args.path.is_dir() {
        let files = source::csv_files_in(&args.path)
            .with_context(|| format!("Error reading directory {}", args.path.display()))?;
        if files.is_empty() {
            bail!("No CSV files found in directory {}", args.path.display());
        }
        files
    } else if args.path.is_file() {
        vec![args.path.clone()]
    } else {
        bail!("Path {} does not exist", args.path.display());
    };

    let failures = Arc::new(FileFailureSink::new(config.failure_dir()));
    let pipeline = ConversionPipeline::from_config(&config, failures)?;

    let single = files.len() == 1;
    for file in &files {
        info!("Processing file: {}", file.display());
        match convert_file(&pipeline, file).await {
            Ok(()) => {}
            Err(e) if can_skip(&e, single) => {
                error!("Skipping {}: {}", file.display(), e);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Conversion of {} aborted", file.display()));
            }
        }
    }

    Ok(())
}

async fn convert_file(pipeline: &ConversionPipeline, file: &Path) -> pmoapplemusic::Result<()> {
    let tracks = source::read_csv(file)?;
    let name = source::playlist_name_from_path(file);

    let stats = pipeline.run(&name, &tracks).await?;
    println!("\n{}\n", stats);
    Ok(())
}

/// En mode répertoire, seules les erreurs fatales interrompent la suite
fn can_skip(error: &AppleMusicError, single: bool) -> bool {
    !single && !error.is_fatal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_non_fatal_errors_are_skipped_in_directory_mode() {
        let csv = AppleMusicError::CsvFormat("header".into());
        assert!(can_skip(&csv, false));
        assert!(!can_skip(&csv, true));

        let forbidden = AppleMusicError::from_status_code(403, "forbidden");
        assert!(!can_skip(&forbidden, false));
        assert!(!can_skip(&AppleMusicError::from_status_code(400, "bad"), false));
    }
}
