//! Vérification de la date de sortie d'un candidat
//!
//! La page de détail publique d'un morceau (`trackViewUrl`) affiche la date
//! de sortie de l'album dans son pied de liste. On la compare, au jour près,
//! à la date exportée avec la playlist source.

use crate::error::{AppleMusicError, Result};
use crate::limiter::RateLimitedClient;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Sélecteur du paragraphe contenant la date de sortie
const FOOTER_SELECTOR: &str = "p[data-testid='tracklist-footer-description']";

/// Formats de date acceptés, essayés dans l'ordre
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%d %B %Y"];

/// Oracle booléen de vérification de date de sortie
#[async_trait]
pub trait DateOracle: Send + Sync {
    /// Vrai si la date publiée sur `detail_url` est le même jour que `target`.
    ///
    /// Ne doit jamais échouer : toute erreur donne `false`.
    async fn verify_release_date(&self, detail_url: &str, target: &str) -> bool;
}

/// Parse une date textuelle selon les formats connus
pub fn parse_release_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Compare deux dates textuelles au jour près
pub fn same_calendar_date(published: &str, target: &str) -> bool {
    match (parse_release_date(published), parse_release_date(target)) {
        (Some(published), Some(target)) => published == target,
        _ => false,
    }
}

/// Extrait la première ligne du pied de liste d'une page de détail
pub fn extract_release_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(FOOTER_SELECTOR).ok()?;
    let element = document.select(&selector).next()?;
    let text: String = element.text().collect();
    text.split('\n')
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

/// Oracle lisant la page de détail HTML d'Apple Music
pub struct HtmlDateOracle {
    client: Client,
    limiter: Arc<RateLimitedClient>,
}

impl HtmlDateOracle {
    pub fn new(limiter: Arc<RateLimitedClient>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::api::DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, limiter })
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.limiter
            .call(|| async move {
                let response = self.client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(AppleMusicError::from_status_code(
                        status.as_u16(),
                        format!("detail page {}", url),
                    ));
                }
                Ok(response.text().await?)
            })
            .await
    }
}

#[async_trait]
impl DateOracle for HtmlDateOracle {
    async fn verify_release_date(&self, detail_url: &str, target: &str) -> bool {
        debug!("Verifying release date: {}", detail_url);

        let html = match self.fetch_page(detail_url).await {
            Ok(html) => html,
            Err(e) => {
                error!("Error verifying release date: {}", e);
                return false;
            }
        };

        match extract_release_text(&html) {
            Some(published) => same_calendar_date(&published, target),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_formats() {
        let expected = NaiveDate::from_ymd_opt(1959, 8, 17);
        assert_eq!(parse_release_date("1959-08-17"), expected);
        assert_eq!(parse_release_date("Aug 17, 1959"), expected);
        assert_eq!(parse_release_date("August 17, 1959"), expected);
        assert_eq!(parse_release_date("17 Aug 1959"), expected);
        assert_eq!(parse_release_date("17 August 1959"), expected);
    }

    #[test]
    fn test_parse_rejects_partial_dates() {
        assert_eq!(parse_release_date(""), None);
        assert_eq!(parse_release_date("1959"), None);
        assert_eq!(parse_release_date("next tuesday"), None);
    }

    #[test]
    fn test_same_calendar_date_across_formats() {
        assert!(same_calendar_date("August 17, 1959", "1959-08-17"));
        assert!(!same_calendar_date("August 18, 1959", "1959-08-17"));
        assert!(!same_calendar_date("unknown", "1959-08-17"));
    }

    #[test]
    fn test_extract_first_footer_line() {
        let html = r#"<html><body>
            <p data-testid="other">March 1, 2000</p>
            <p data-testid="tracklist-footer-description">August 17, 1959
5 songs, 45 minutes
℗ 1959 Columbia Records</p>
        </body></html>"#;
        assert_eq!(extract_release_text(html).as_deref(), Some("August 17, 1959"));
    }

    #[test]
    fn test_extract_without_footer() {
        assert_eq!(extract_release_text("<html><p>nothing</p></html>"), None);
    }
}
