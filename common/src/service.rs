//! Client for the MD-Repo web service: ticket resolution and metadata verification.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing::instrument;

use crate::config::{Config, GET_TICKET_API, VERIFY_METADATA_API};
use crate::error::Error;
use crate::metadata::metadata_path;
use crate::ticket::{self, Ticket};

#[derive(Debug, serde::Deserialize)]
struct TicketResponse {
    tickets: String,
}

#[derive(Debug, serde::Serialize)]
struct VerifyRequest {
    directory: String,
    toml: String,
    token: String,
}

#[derive(Debug, serde::Deserialize)]
struct VerifyResponse {
    directory: String,
    valid: bool,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(service_url: &str) -> Result<Self> {
        if !service_url.starts_with("http://") && !service_url.starts_with("https://") {
            return Err(anyhow!("service URL {:?} must be http or https", service_url));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: service_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, api: &str) -> String {
        format!("{}{}", self.base_url, api)
    }

    async fn post_text(&self, url: &str, body: String) -> Result<String> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .header(reqwest::header::ACCEPT, "*/*")
            .body(body)
            .send()
            .await
            .map_err(|source| Error::Dial {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read response from {url}"))?;
        if status != reqwest::StatusCode::OK {
            tracing::debug!("{} answered {}: {}", url, status, text);
            return Err(Error::Service(text).into());
        }
        Ok(text)
    }

    /// Exchanges a token for a ticket list string.
    #[instrument(skip(self, token))]
    pub async fn get_ticket_string(&self, token: &str) -> Result<String> {
        let url = self.endpoint(GET_TICKET_API);
        let body = self.post_text(&url, token.to_string()).await?;
        let response: TicketResponse = serde_json::from_str(&body)
            .with_context(|| format!("unexpected ticket response from {url}"))?;
        Ok(response.tickets)
    }

    /// Asks the service to check the metadata of every submission directory.
    #[instrument(skip(self, token))]
    pub async fn verify_metadata(&self, dirs: &[PathBuf], token: &str) -> Result<()> {
        let mut requests = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let path = metadata_path(dir);
            let toml = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read submission metadata {:?}", path))?;
            requests.push(VerifyRequest {
                directory: dir.display().to_string(),
                toml,
                token: token.to_string(),
            });
        }
        let url = self.endpoint(VERIFY_METADATA_API);
        let body = serde_json::to_string(&requests).context("failed to encode verify request")?;
        let body = self.post_text(&url, body).await?;
        let responses: Vec<VerifyResponse> = serde_json::from_str(&body)
            .with_context(|| format!("unexpected verify response from {url}"))?;
        let mut problems = Vec::new();
        for response in responses.iter().filter(|r| !r.valid) {
            if response.errors.is_empty() {
                problems.push(format!("invalid submit metadata, path {:?}", response.directory));
            }
            for error in &response.errors {
                problems.push(format!("{}, path {:?}", error, response.directory));
            }
        }
        if problems.is_empty() {
            tracing::debug!("all submission metadata is valid");
            return Ok(());
        }
        Err(Error::MetadataVerification(problems).into())
    }
}

/// Tickets for downloads; the token is sent as is.
///
/// The ticket string is resolved at most once per [`Config`].
pub async fn resolve_download_tickets(config: &mut Config) -> Result<Vec<Ticket>> {
    resolve_tickets(config, |token| Ok(token.to_string())).await
}

/// Tickets for submissions; the token is first salted with the submitter's ORC-ID.
pub async fn resolve_submit_tickets(config: &mut Config, orcid: &str) -> Result<Vec<Ticket>> {
    resolve_tickets(config, |token| ticket::derive_submit_token(token, orcid)).await
}

async fn resolve_tickets(
    config: &mut Config,
    transform: impl FnOnce(&str) -> Result<String>,
) -> Result<Vec<Ticket>> {
    if !config.is_resolved() {
        let token = config.token().ok_or(Error::TokenNotProvided)?;
        let wire_token = transform(token)?;
        let client = ServiceClient::new(&config.service_url)?;
        let ticket_string = client
            .get_ticket_string(&wire_token)
            .await
            .context("failed to read ticket from token")?;
        config.ticket_string = Some(ticket_string);
    }
    let ticket_string = config.ticket_string.as_deref().ok_or(Error::TokenNotProvided)?;
    ticket::read_ticket_string(ticket_string, config.ticket_password.as_deref())
        .context("failed to retrieve tickets")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::serve;
    use axum::http::StatusCode;
    use tracing_test::traced_test;

    const TICKETS: &str = "tkt1:/iplant/home/shared/mdrepo/prod/release/sim1";

    fn ticket_router() -> axum::Router {
        axum::Router::new().route(
            GET_TICKET_API,
            axum::routing::post(|body: String| async move {
                if body == "good-token" {
                    (StatusCode::OK, format!(r#"{{"tickets": "{TICKETS}"}}"#))
                } else {
                    (StatusCode::UNAUTHORIZED, "token expired".to_string())
                }
            }),
        )
    }

    #[tokio::test]
    #[traced_test]
    async fn token_resolves_once() -> Result<()> {
        let url = serve(ticket_router()).await?;
        let mut config = Config::new(url);
        config.token = Some("good-token".to_string());
        let tickets = resolve_download_tickets(&mut config).await?;
        assert_eq!(tickets.len(), 1);
        assert!(config.is_resolved());
        // a resolved config no longer needs the service
        config.service_url = "http://127.0.0.1:1".to_string();
        assert_eq!(resolve_download_tickets(&mut config).await?, tickets);
        Ok(())
    }

    #[tokio::test]
    async fn service_error_body_is_passed_through() -> Result<()> {
        let url = serve(ticket_router()).await?;
        let mut config = Config::new(url);
        config.token = Some("stale".to_string());
        let err = resolve_download_tickets(&mut config).await.unwrap_err();
        assert!(matches!(crate::error::kind(&err), Some(Error::Service(body)) if body == "token expired"));
        assert!(!config.is_resolved());
        Ok(())
    }

    #[tokio::test]
    async fn missing_token() {
        let mut config = Config::new("http://127.0.0.1:1");
        let err = resolve_download_tickets(&mut config).await.unwrap_err();
        assert!(matches!(crate::error::kind(&err), Some(Error::TokenNotProvided)));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_dial_error() {
        let client = ServiceClient::new("http://127.0.0.1:1").unwrap();
        let err = client.get_ticket_string("t").await.unwrap_err();
        assert!(matches!(crate::error::kind(&err), Some(Error::Dial { .. })));
        assert!(ServiceClient::new("ftp://example.org").is_err());
    }

    #[tokio::test]
    async fn metadata_verification_reports_errors() -> Result<()> {
        let router = axum::Router::new().route(
            VERIFY_METADATA_API,
            axum::routing::post(|body: String| async move {
                let requests: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap_or_default();
                let responses: Vec<serde_json::Value> = requests
                    .iter()
                    .map(|r| {
                        let valid = r["toml"].as_str().is_some_and(|t| t.contains("lead_contributor_orcid"));
                        serde_json::json!({
                            "directory": r["directory"],
                            "valid": valid,
                            "errors": if valid { vec![] } else { vec!["missing orcid"] },
                        })
                    })
                    .collect();
                serde_json::to_string(&responses).unwrap_or_default()
            }),
        );
        let url = serve(router).await?;
        let tmp = tempfile::tempdir()?;
        let good = tmp.path().join("good");
        let bad = tmp.path().join("bad");
        for (dir, text) in [(&good, "lead_contributor_orcid = \"x\"\n"), (&bad, "title = \"y\"\n")] {
            tokio::fs::create_dir(dir).await?;
            tokio::fs::write(metadata_path(dir), text).await?;
        }
        let client = ServiceClient::new(&url)?;
        client.verify_metadata(std::slice::from_ref(&good), "tok").await?;
        let err = client.verify_metadata(&[good, bad], "tok").await.unwrap_err();
        let Some(Error::MetadataVerification(problems)) = crate::error::kind(&err) else {
            panic!("unexpected error {err:#}");
        };
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("missing orcid"));
        Ok(())
    }
}
