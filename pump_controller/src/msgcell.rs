//! The remote message channel: two single-cell stores, one the operator
//! writes commands into and one the controller writes its log line into.
//! A cell is plain HTTP: GET returns the content, POST overwrites it.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait CellStore: Send + Sync {
    async fn read(&self) -> Result<String>;
    async fn write(&self, content: &str) -> Result<()>;
}

pub struct HttpCell {
    client: reqwest::Client,
    url: String,
}

impl HttpCell {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl CellStore for HttpCell {
    async fn read(&self) -> Result<String> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn write(&self, content: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .body(content.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct Cells {
    pub message: Option<Box<dyn CellStore>>,
    pub log: Option<Box<dyn CellStore>>,
}

impl Cells {
    /// Fetch and clear the operator cell. `None` means the read failed;
    /// an empty string means there was no message.
    pub async fn read_and_clear_message(&self) -> Option<String> {
        let cell = self.message.as_ref()?;
        match cell.read().await {
            Ok(content) => {
                if !content.trim().is_empty() {
                    if let Err(e) = cell.write("").await {
                        warn!(error = %e, "could not clear the message cell");
                    }
                    Some(content)
                } else {
                    Some(String::new())
                }
            }
            Err(e) => {
                warn!(error = %e, "message cell read failed");
                None
            }
        }
    }

    /// Overwrite the log cell; best effort.
    pub async fn write_log(&self, content: &str) {
        if let Some(cell) = &self.log {
            if let Err(e) = cell.write(content).await {
                warn!(error = %e, "log cell write failed");
            }
        }
    }
}
