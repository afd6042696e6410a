// SPDX-License-Identifier: GPL-3.0-only

//! Thin client for the content-delivery endpoint's upload/verify protocol.

use std::path::Path;

use reqwest::{StatusCode, multipart};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::AgentError;

pub struct CdnClient {
    http: reqwest::Client,
    base_url: String,
}

impl CdnClient {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}"),
        }
    }

    /// `POST /upload` the file at `path` as multipart field `files`,
    /// returning the server's id for it (the last whitespace-separated
    /// token of the response body).
    pub async fn upload(&self, path: &Path) -> Result<String, AgentError> {
        let mut file = File::open(path).await?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());

        let part = multipart::Part::bytes(contents).file_name(file_name);
        let form = multipart::Form::new().part("files", part);

        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;

        body.split_whitespace()
            .next_back()
            .map(ToString::to_string)
            .ok_or_else(|| AgentError::Transient("empty upload response body".to_string()))
    }

    /// `GET /<id>` and return the HTTP status for the caller to interpret.
    pub async fn verify(&self, id: &str) -> Result<StatusCode, AgentError> {
        let response = self
            .http
            .get(format!("{}/{id}", self.base_url))
            .send()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_built_from_host_and_port() {
        let client = CdnClient::new("cdn.example.com", 9000);
        assert_eq!(client.base_url, "http://cdn.example.com:9000");
    }
}
