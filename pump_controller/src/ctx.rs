use std::time::Duration;

use anyhow::Result;

use crate::config::{Cli, Settings};
use crate::ir::IrTransmitter;
use crate::mail::Mailer;
use crate::msgcell::{Cells, HttpCell};
use crate::sources::Sources;
use crate::storage::Storage;

/// Everything the loop talks to. Built once at startup and passed down by
/// reference; the loop's own mutable state lives in `PipelineState`.
pub struct Ctx {
    pub settings: Settings,
    pub client: reqwest::Client,
    pub sources: Sources,
    pub storage: Storage,
    pub mailer: Mailer,
    pub cells: Cells,
    pub ir: IrTransmitter,
}

impl Ctx {
    pub fn build(cli: &Cli, settings: Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let storage = Storage::open(&cli.database)?;
        let mailer = Mailer::new(settings.email_addresses.clone(), settings.smtp_server.clone());
        let cells = Cells {
            message: settings
                .message_cell_url
                .clone()
                .map(|url| Box::new(HttpCell::new(client.clone(), url)) as _),
            log: settings
                .log_cell_url
                .clone()
                .map(|url| Box::new(HttpCell::new(client.clone(), url)) as _),
        };
        Ok(Self {
            sources: Sources::new(client.clone()),
            client,
            settings,
            storage,
            mailer,
            cells,
            ir: IrTransmitter,
        })
    }
}
