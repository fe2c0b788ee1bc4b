// Failures the loop has to carry past an adapter boundary: subprocess IO,
// SQLite, and the IR actuator itself.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CtlError {
    #[error("IO: {0}")] Io(#[from] std::io::Error),
    #[error("Storage: {0}")] Storage(#[from] rusqlite::Error),
    #[error("Actuator: {0}")] Actuator(String),
}
