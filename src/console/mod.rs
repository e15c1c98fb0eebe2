//! Operator console
//!
//! A line-oriented control plane on the process's standard input. Every
//! command is parsed, applied to the shared state, and answered on stdout;
//! a bad command prints a hint and the loop keeps reading.

mod commands;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::server::BalancerState;

pub use commands::{execute, BanTarget, Command, Target};

/// Drive the console until stdin closes.
pub async fn run_console(state: Arc<BalancerState>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match Command::parse(&line) {
                Ok(None) => {}
                Ok(Some(command)) => println!("{}", execute(command, &state)),
                Err(hint) => println!("{}", hint),
            },
            Ok(None) => {
                tracing::info!("console input closed");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                return;
            }
        }
    }
}
