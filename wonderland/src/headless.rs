//! Line-oriented protocol over stdin and stdout.
//!
//! Every input line is one command. Output is plain narrative, one block per
//! command, followed by a blank line. Lines prefixed with `[ERROR]` report
//! failures outside the fiction (storage trouble); the command can be sent
//! again.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use wonderland_core::{EntityKind, Outcome, Realm, RealmError, Session, Status};

pub async fn run(realm: Arc<Realm>, name: &str) -> anyhow::Result<()> {
    let (session, arrival) = Session::open(realm.clone(), name, EntityKind::Custodian).await?;
    println!("=== Wonderland ===");
    print_outcome(&arrival);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!(session = %session.id(), "Interrupted");
                session.cancel_handle().cancel();
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match session.send(line).await {
            Ok(outcome) => {
                print_outcome(&outcome);
                if outcome.status == Status::Quit {
                    break;
                }
            }
            Err(RealmError::Cancelled) => break,
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "Command not recorded");
                println!("[ERROR] {}", err.narrative());
                println!();
            }
            Err(err) => return Err(err.into()),
        }
    }

    match realm.checkpoint().await {
        Ok(last) => info!(last_event = ?last, "Checkpoint written"),
        Err(err) => warn!(error = %err, "Checkpoint failed, the log still holds every event"),
    }
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    println!("{}", outcome.narrative);
    println!();
}
