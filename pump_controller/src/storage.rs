//! SQLite persistence: the operator command log, the IR send log and the
//! saved controller state. Every append is its own transaction.

use chrono::Utc;
use pump_protocol::{Command, OperatorMessage};
use rusqlite::{Connection, OptionalExtension, params};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::CtlError;

pub const CONTROLLER_STATE_NAME: &str = "Auto.controller";

pub struct Storage {
    conn: Connection,
}

#[derive(Debug, Serialize, Deserialize)]
struct ControllerStateJson {
    integral: String,
}

impl Storage {
    pub fn open(path: &str) -> Result<Self, CtlError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CtlError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CtlError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS CommandLog (
                 id INTEGER PRIMARY KEY,
                 command TEXT NOT NULL,
                 param TEXT NOT NULL DEFAULT '',
                 ts TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS IRSendLog (
                 id INTEGER PRIMARY KEY,
                 command TEXT NOT NULL,
                 ts TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS SavedState (
                 name TEXT PRIMARY KEY,
                 json TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    /// Record an accepted operator message.
    pub fn append_command_log(&self, message: &OperatorMessage) -> Result<(), CtlError> {
        self.conn.execute(
            "INSERT INTO CommandLog (command, param, ts) VALUES (?1, ?2, ?3)",
            params![message.command_word(), message.param_json(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// The most recent operator message, decoded; `None` when the log is
    /// empty or the stored row no longer parses.
    pub fn last_command_log(&self) -> Result<Option<OperatorMessage>, CtlError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT command, param FROM CommandLog ORDER BY ts DESC, id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(command, param)| OperatorMessage::from_parts(&command, &param)))
    }

    pub fn append_ir_log(&self, command: &Command) -> Result<(), CtlError> {
        self.conn.execute(
            "INSERT INTO IRSendLog (command, ts) VALUES (?1, ?2)",
            params![command.token(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn save_controller_integral(&self, integral: Decimal) -> Result<(), CtlError> {
        let json = serde_json::to_string(&ControllerStateJson { integral: integral.to_string() })
            .unwrap_or_default();
        self.conn.execute(
            "INSERT INTO SavedState (name, json) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET json = excluded.json",
            params![CONTROLLER_STATE_NAME, json],
        )?;
        Ok(())
    }

    /// The persisted integral, if one is stored and still parses.
    pub fn load_controller_integral(&self) -> Result<Option<Decimal>, CtlError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT json FROM SavedState WHERE name = ?1",
                params![CONTROLLER_STATE_NAME],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json
            .and_then(|j| serde_json::from_str::<ControllerStateJson>(&j).ok())
            .and_then(|s| Decimal::from_str(&s.integral).ok()))
    }
}
