//! The IR transmitter: an `irsend` subprocess per command, with one LIRC
//! daemon restart attempt when it fails.

use std::time::Duration;

use pump_protocol::Command;
use tokio::process;
use tracing::{error, info, warn};

use crate::errors::CtlError;
use crate::util::retry_async;

const IR_TRIES: u32 = 2;
const IR_RETRY_PAUSE: Duration = Duration::from_secs(5);

pub struct IrTransmitter;

impl IrTransmitter {
    pub async fn send(&self, command: &Command) -> Result<(), CtlError> {
        let token = command.token();
        info!(command = %token, "sending IR");
        let token = token.as_str();
        retry_async(IR_TRIES, IR_RETRY_PAUSE, move || transmit_once(token)).await
    }
}

async fn transmit_once(token: &str) -> Result<(), CtlError> {
    let output = process::Command::new("irsend")
        .args(["SEND_ONCE", "ilp", token])
        .output()
        .await?;
    if output.status.success() {
        return Ok(());
    }
    error!(
        code = output.status.code().unwrap_or(-1),
        stderr = %String::from_utf8_lossy(&output.stderr),
        "irsend failed"
    );
    restart_lirc().await;
    Err(CtlError::Actuator(format!(
        "irsend exited with {}",
        output.status.code().unwrap_or(-1)
    )))
}

async fn restart_lirc() {
    warn!("restarting lirc");
    match process::Command::new("sudo")
        .args(["service", "lirc", "restart"])
        .status()
        .await
    {
        Ok(status) if status.success() => info!("lirc restarted"),
        Ok(status) => warn!(code = status.code().unwrap_or(-1), "lirc restart failed"),
        Err(e) => warn!(error = %e, "could not run lirc restart"),
    }
}
