//! Lecture des playlists exportées au format CSV d'Exportify
//!
//! Seules les colonnes utiles sont lues : titre (1), artiste (3), album (5),
//! artiste de l'album (7), date de sortie (8) et ISRC (16). Les noms de
//! colonnes dépendent de la langue de l'export ; l'en-tête est validé contre
//! les variantes connues.

use crate::error::{AppleMusicError, Result};
use crate::models::SourceTrack;
use std::path::{Path, PathBuf};
use tracing::debug;

const MIN_COLUMNS: usize = 17;

const TITLE_COLUMN: usize = 1;
const ARTIST_COLUMN: usize = 3;
const ALBUM_COLUMN: usize = 5;
const ALBUM_ARTIST_COLUMN: usize = 7;
const RELEASE_DATE_COLUMN: usize = 8;
const ISRC_COLUMN: usize = 16;

const TRACK_NAME_HEADERS: &[&str] = &[
    "Track Name",
    "Track-Name",
    "Nombre de la canción",
    "Nom du titre",
    "Nome della traccia",
    "Nummmernaam",
    "Nome da faixa",
    "Låtens namn",
    "Parça Adı",
    "اسم الأغنية",
    "トラック名",
];

const ARTIST_NAME_HEADERS: &[&str] = &[
    "Artist Name(s)",
    "Künstlername(n)",
    "Nombre(s) del artista",
    "Nom(s) de l'artiste",
    "Nome dell'artista",
    "Naam van artiest",
    "Nome(s) do artista",
    "Artistens namn",
    "Sanatçı Adı",
    "أسماء الفنانين",
    "アーティスト名",
];

const ALBUM_NAME_HEADERS: &[&str] = &[
    "Album Name",
    "Album-Name",
    "Nombre del álbum",
    "Nom de l'album",
    "Nome dell'album",
    "Naam van album",
    "Albumets namn",
    "Albüm Adı",
    "Nome do álbum",
    "اسم الألبوم",
    "アルバム名",
];

const FORMAT_HINT: &str = "the CSV file is not in the correct format, please download it from https://watsonbox.github.io/exportify/";

/// Découpe une ligne CSV en respectant les guillemets (`""` = guillemet littéral)
fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
        .into_iter()
        .map(|field| field.trim().to_string())
        .collect()
}

fn validate_headers(headers: &[String]) -> Result<()> {
    if headers.len() < MIN_COLUMNS {
        return Err(AppleMusicError::CsvFormat(format!(
            "{} (expected at least {} columns, found {})",
            FORMAT_HINT,
            MIN_COLUMNS,
            headers.len()
        )));
    }

    let known = |column: usize, names: &[&str]| names.contains(&headers[column].as_str());
    if !known(TITLE_COLUMN, TRACK_NAME_HEADERS)
        || !known(ARTIST_COLUMN, ARTIST_NAME_HEADERS)
        || !known(ALBUM_COLUMN, ALBUM_NAME_HEADERS)
        || headers[ISRC_COLUMN] != "ISRC"
    {
        return Err(AppleMusicError::CsvFormat(FORMAT_HINT.to_string()));
    }

    Ok(())
}

/// Parse le contenu d'un export Exportify
pub fn parse_csv(content: &str) -> Result<Vec<SourceTrack>> {
    let mut lines = content
        .trim_start_matches('\u{feff}')
        .lines()
        .filter(|line| !line.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| AppleMusicError::CsvFormat("CSV file is empty".to_string()))?;
    validate_headers(&split_line(header))?;

    let tracks: Vec<SourceTrack> = lines
        .map(|line| {
            let mut values = split_line(line);
            if values.len() < MIN_COLUMNS {
                values.resize(MIN_COLUMNS, String::new());
            }
            let isrc = std::mem::take(&mut values[ISRC_COLUMN]);
            SourceTrack {
                title: std::mem::take(&mut values[TITLE_COLUMN]),
                artist: std::mem::take(&mut values[ARTIST_COLUMN]),
                album: std::mem::take(&mut values[ALBUM_COLUMN]),
                album_artist: std::mem::take(&mut values[ALBUM_ARTIST_COLUMN]),
                release_date: std::mem::take(&mut values[RELEASE_DATE_COLUMN]),
                isrc: Some(isrc).filter(|s| !s.is_empty()),
            }
        })
        .collect();

    debug!("Parsed {} tracks", tracks.len());
    Ok(tracks)
}

/// Lit un fichier CSV exporté
pub fn read_csv(path: impl AsRef<Path>) -> Result<Vec<SourceTrack>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppleMusicError::CsvFormat(format!("Error reading CSV file {}: {}", path.display(), e))
    })?;
    parse_csv(&content)
}

/// Nom de playlist déduit du fichier : `my_jazz.csv` → `My jazz`
pub fn playlist_name_from_path(path: impl AsRef<Path>) -> String {
    let file_name = path
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default().replace('_', " ");

    let mut chars = stem.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Fichiers `.csv` d'un répertoire, triés par nom
pub fn csv_files_in(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    files.sort();
    Ok(files)
}
