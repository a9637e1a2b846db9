use std::time::Instant;

use super::{CliError, CliResult};
use crate::bridge::{self, BridgeSettings};
use crate::config::DashConfig;
use crate::logging::{ChatLogEntry, ChatMode, log_chat_exchange};

/// One exchange from the terminal; the reply goes to stdout.
pub async fn handle_chat_cmd(cfg: &DashConfig, message: String, session: String) -> CliResult<()> {
    let settings = BridgeSettings::from_config(cfg);
    let started = Instant::now();
    let result = bridge::one_shot(&settings, &session, &message).await;
    let (outcome, chars) = match &result {
        Ok(text) => ("ok", text.chars().count()),
        Err(err) => (err.code(), 0),
    };
    log_chat_exchange(&ChatLogEntry::new(
        ChatMode::Cli,
        &session,
        outcome,
        started.elapsed().as_millis() as u64,
        chars,
    ));

    match result {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(err) => Err(CliError::from(err)),
    }
}
