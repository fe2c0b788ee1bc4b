//! The operating-mode machine: read the last operator wish from the log,
//! then run autonomously until the operator says otherwise, or do what the
//! operator said until told to go back to auto.

use std::time::Duration;

use pump_protocol::{Command, OperatorCommand, OperatorMessage};
use tracing::{info, warn};

use crate::ctx::Ctx;
use crate::pipeline::{self, PipelineState};
use crate::{health, util};

const MESSAGE_POLL_PAUSE: Duration = Duration::from_secs(60 * 10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    ReadLast,
    Auto,
    Manual,
    WaitMessageManual,
}

pub async fn run_machine(ctx: &Ctx, st: &mut PipelineState) -> anyhow::Result<()> {
    let mut state = State::ReadLast;
    let mut payload: Option<OperatorMessage> = None;
    loop {
        let output = run_state(ctx, st, state, payload.take()).await;
        let next = next_state(state, st, output.as_ref());
        info!(from = ?state, to = ?next, payload = ?output, "state transition");
        state = next;
        payload = output;
    }
}

async fn run_state(
    ctx: &Ctx,
    st: &mut PipelineState,
    state: State,
    payload: Option<OperatorMessage>,
) -> Option<OperatorMessage> {
    match state {
        State::ReadLast => match ctx.storage.last_command_log() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "could not read the command log");
                None
            }
        },
        State::Auto => {
            let _bag = pipeline::run_once(ctx, st, payload).await;
            most_recent_message(ctx, true).await
        }
        State::Manual => {
            run_manual(ctx, payload).await;
            None
        }
        State::WaitMessageManual => most_recent_message(ctx, false).await,
    }
}

fn next_state(state: State, st: &mut PipelineState, payload: Option<&OperatorMessage>) -> State {
    match state {
        State::ReadLast => match payload {
            Some(m) if m.is_auto() => State::Auto,
            _ => State::Manual,
        },
        State::Auto => match payload {
            None => State::Auto,
            Some(m) if m.is_auto() => State::Auto,
            Some(_) => {
                // the controller must not carry its wound-up integral into a
                // later return to auto
                st.reset_for_manual();
                State::Manual
            }
        },
        State::Manual => State::WaitMessageManual,
        State::WaitMessageManual => match payload {
            Some(m) if m.is_auto() => State::Auto,
            Some(_) => State::Manual,
            None => State::WaitMessageManual,
        },
    }
}

async fn run_manual(ctx: &Ctx, payload: Option<OperatorMessage>) {
    let command = match payload.map(|m| m.command) {
        Some(OperatorCommand::TurnOff) => Some(Command::Off),
        Some(OperatorCommand::SetTemp { temp }) => match Command::heat(temp) {
            Ok(command) => Some(command),
            Err(e) => {
                warn!(error = %e, "unusable set temp request");
                None
            }
        },
        _ => None,
    };

    let Some(command) = command else { return };

    match ctx.ir.send(&command).await {
        Ok(()) => {
            if let Err(e) = ctx.storage.append_ir_log(&command) {
                warn!(error = %e, "could not append to the IR log");
            }
        }
        Err(e) => warn!(error = %e, command = %command, "manual IR send failed"),
    }
    let stamp = chrono::Utc::now().with_timezone(&ctx.settings.tz()).format("%d.%m.%Y %H:%M");
    ctx.cells.write_log(&format!("{command}\n{stamp}")).await;
}

/// Poll the message cell. With `once` the wait is bounded by a single pause;
/// otherwise this blocks until an operator message arrives. Accepted
/// messages are appended to the command log before they are returned.
async fn most_recent_message(ctx: &Ctx, once: bool) -> Option<OperatorMessage> {
    info!("start polling messages");
    loop {
        if let Some(raw) = ctx.cells.read_and_clear_message().await {
            health::ping(&ctx.client, &ctx.settings.healthcheck_url_message).await;
            if !raw.trim().is_empty() {
                match OperatorMessage::parse(&raw) {
                    Some(message) => {
                        if let Err(e) = ctx.storage.append_command_log(&message) {
                            warn!(error = %e, "could not log the operator message");
                        }
                        return Some(message);
                    }
                    None => {
                        warn!(raw = %raw, "malformed operator message, treating as none");
                        return None;
                    }
                }
            }
        }
        info!(secs = MESSAGE_POLL_PAUSE.as_secs(), iso = %util::now_isoformat(), "sleeping");
        tokio::time::sleep(MESSAGE_POLL_PAUSE).await;
        if once {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgcell::testing::FakeCell;
    use rust_decimal_macros::dec;

    fn msg(raw: &str) -> Option<OperatorMessage> {
        OperatorMessage::parse(raw)
    }

    #[test]
    fn read_last_goes_auto_only_on_an_auto_message() {
        let mut st = PipelineState::new();
        let auto = msg(r#"{"command":"auto","param":null}"#);
        assert_eq!(next_state(State::ReadLast, &mut st, auto.as_ref()), State::Auto);

        let off = msg(r#"{"command":"turn off","param":null}"#);
        assert_eq!(next_state(State::ReadLast, &mut st, off.as_ref()), State::Manual);
        assert_eq!(next_state(State::ReadLast, &mut st, None), State::Manual);
    }

    #[test]
    fn auto_stays_auto_without_messages() {
        let mut st = PipelineState::new();
        assert_eq!(next_state(State::Auto, &mut st, None), State::Auto);
        let auto = msg(r#"{"command":"auto","param":null}"#);
        assert_eq!(next_state(State::Auto, &mut st, auto.as_ref()), State::Auto);
    }

    #[test]
    fn leaving_auto_resets_the_loop_state() {
        let mut st = PipelineState::new();
        st.last_command = Some(Command::Heat(10));
        st.minimum_inside_temp = Some(dec!(7));
        st.last_status_email = Some("ok".to_string());

        let off = msg(r#"{"command":"turn off","param":null}"#);
        assert_eq!(next_state(State::Auto, &mut st, off.as_ref()), State::Manual);
        assert!(st.last_command.is_none());
        assert!(st.minimum_inside_temp.is_none());
        assert!(st.last_status_email.is_none());
        assert!(st.controller.is_none());
    }

    #[test]
    fn manual_always_parks_in_the_wait_state() {
        let mut st = PipelineState::new();
        assert_eq!(next_state(State::Manual, &mut st, None), State::WaitMessageManual);
    }

    #[test]
    fn wait_state_routes_messages_and_holds_on_noise() {
        let mut st = PipelineState::new();
        let auto = msg(r#"{"command":"auto","param":null}"#);
        let set = msg(r#"{"command":"set temp","param":{"temp":24}}"#);
        assert_eq!(next_state(State::WaitMessageManual, &mut st, auto.as_ref()), State::Auto);
        assert_eq!(next_state(State::WaitMessageManual, &mut st, set.as_ref()), State::Manual);
        assert_eq!(next_state(State::WaitMessageManual, &mut st, None), State::WaitMessageManual);
    }

    #[tokio::test]
    async fn a_waiting_message_is_read_logged_and_cleared() {
        let mut ctx = crate::pipeline::testing::offline_ctx();
        ctx.cells.message = Some(FakeCell::with(r#"{"command":"turn off","param":null}"#));

        let message = most_recent_message(&ctx, true).await.unwrap();
        assert_eq!(message.command, OperatorCommand::TurnOff);

        // the accepted message landed in the command log
        let logged = ctx.storage.last_command_log().unwrap().unwrap();
        assert_eq!(logged.command, OperatorCommand::TurnOff);
    }

    #[tokio::test]
    async fn malformed_messages_read_as_none() {
        let mut ctx = crate::pipeline::testing::offline_ctx();
        ctx.cells.message = Some(FakeCell::with("{broken"));
        assert!(most_recent_message(&ctx, true).await.is_none());
        assert!(ctx.storage.last_command_log().unwrap().is_none());
    }
}
