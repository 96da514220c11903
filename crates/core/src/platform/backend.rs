use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;

use crate::error::Result;
use crate::logger;
use crate::settings::ServerSettings;
use super::{CommandSource, ResultSink};

/// Category of free-form command output; everything else is a duty report.
pub const CHAT_CATEGORY: &str = "chat";

#[derive(Serialize)]
struct SquadReport<'a> {
    id: u32,
    mode: &'a str,
    info: &'a str,
}

fn client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Uploads captured output to the control backend on a detached thread.
pub struct BackendSink {
    url: String,
    server_id: u32,
    client: Client,
}

impl BackendSink {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            url: settings.url.trim_end_matches('/').to_string(),
            server_id: settings.id,
            client: client(Duration::from_secs(3)),
        }
    }
}

impl ResultSink for BackendSink {
    fn publish(&self, category: &str, payload: &str) {
        let client = self.client.clone();
        let id = self.server_id;
        let category = category.to_string();
        let payload = payload.to_string();
        let url = self.url.clone();
        thread::spawn(move || {
            let sent = if category == CHAT_CATEGORY {
                client.post(format!("{}/api/v1/recycling", url)).json(&payload).send()
            } else {
                let report = SquadReport { id, mode: &category, info: &payload };
                client.post(format!("{}/api/v1/squad", url)).json(&report).send()
            };
            match sent {
                Ok(resp) if !resp.status().is_success() => {
                    logger::warn_p("backend", &format!("publish {} -> {}", category, resp.status()));
                }
                Ok(_) => {}
                Err(e) => logger::warn_p("backend", &format!("publish {} failed: {}", category, e)),
            }
        });
    }
}

/// Polls the control backend for commands queued by operators.
pub struct BackendSource {
    url: String,
    server_id: u32,
    client: Client,
}

impl BackendSource {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            url: settings.url.trim_end_matches('/').to_string(),
            server_id: settings.id,
            client: client(Duration::from_secs(5)),
        }
    }

    fn fetch_batch(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/run/batch?id={}", self.url, self.server_id);
        Ok(self.client.get(url).send()?.error_for_status()?.json()?)
    }

    fn fetch_single(&self) -> Result<Option<String>> {
        let url = format!("{}/api/v1/run?id={}", self.url, self.server_id);
        let body = self.client.get(url).send()?.error_for_status()?.text()?;
        let body = body.trim();
        Ok((!body.is_empty()).then(|| body.to_string()))
    }
}

impl CommandSource for BackendSource {
    fn fetch_pending(&self) -> Result<Vec<String>> {
        match self.fetch_batch() {
            Ok(commands) => Ok(commands),
            Err(e) => {
                logger::warn_p("backend", &format!("batch fetch failed ({}), trying single", e));
                Ok(self.fetch_single()?.into_iter().collect())
            }
        }
    }
}

/// Sink used when no backend is configured.
pub struct LogSink;

impl ResultSink for LogSink {
    fn publish(&self, category: &str, payload: &str) {
        logger::info_p("backend", &format!("[{}] {} byte(s) captured", category, payload.len()));
    }
}

/// Sink and optional source for the configured server.
pub fn from_settings(settings: &ServerSettings) -> (Box<dyn ResultSink>, Option<Box<dyn CommandSource>>) {
    if settings.url.trim().is_empty() {
        return (Box::new(LogSink), None);
    }
    (Box::new(BackendSink::new(settings)), Some(Box::new(BackendSource::new(settings))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squad_report_shape() {
        let json = serde_json::to_string(&SquadReport { id: 3, mode: "user", info: "2 players" }).unwrap();
        assert_eq!(json, r#"{"id":3,"mode":"user","info":"2 players"}"#);
    }

    #[test]
    fn test_no_url_means_no_source() {
        let (_, source) = from_settings(&ServerSettings { id: 1, url: "  ".into() });
        assert!(source.is_none());
        let (_, source) = from_settings(&ServerSettings { id: 1, url: "https://example.invalid/".into() });
        assert!(source.is_some());
    }
}
