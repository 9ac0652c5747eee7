//! Console front end — reads event commands from stdin and feeds them to the
//! current session.
//!
//! ```text
//! widget <widget-id> <callback-id> [key=value ...]
//! viewport <callback-id> [key=value ...]
//! terminate
//! quit
//! ```
//!
//! Every line, even an empty one, counts as user activity for the liveness
//! monitor. The console outlives individual sessions: after a reboot it
//! picks up the new session from the `current` watch channel.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Target;
use crate::error::AppError;
use crate::queue::Completion;
use crate::session::SessionHandle;
use crate::transport::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Event { target: Target, callback_id: String, payload: Payload },
    Terminate,
    Quit,
    /// Activity only.
    Nothing,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(Command::Nothing);
    };

    let (target, callback_id) = match verb {
        "widget" => {
            let widget = words.next().ok_or("usage: widget <widget-id> <callback-id> [key=value ...]")?;
            let callback = words.next().ok_or("missing callback id")?;
            (Target::Widget(widget.to_string()), callback)
        }
        "viewport" => {
            let callback = words.next().ok_or("usage: viewport <callback-id> [key=value ...]")?;
            (Target::Viewport, callback)
        }
        "terminate" => return Ok(Command::Terminate),
        "quit" | "exit" => return Ok(Command::Quit),
        other => return Err(format!("unknown command: {other}")),
    };

    let payload = words
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| format!("expected key=value, got {pair:?}"))
        })
        .collect::<Result<Payload, String>>()?;

    Ok(Command::Event { target, callback_id: callback_id.to_string(), payload })
}

/// Run until stdin closes, `quit` is entered or `stop` is cancelled.
pub async fn run(
    mut current: watch::Receiver<Option<SessionHandle>>,
    stop: CancellationToken,
) -> Result<(), AppError> {
    info!("console ready: widget | viewport | terminate | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("console stdin closed");
            break;
        };

        let Some(session) = current.borrow_and_update().clone() else {
            warn!("no session running, input ignored");
            continue;
        };
        session.activity.touch();

        match parse_command(line.trim()) {
            Ok(Command::Nothing) => {}
            Ok(Command::Quit) => {
                stop.cancel();
                break;
            }
            Ok(Command::Terminate) => match session.dispatcher.terminate_session() {
                Ok(done) => report(done, "terminate-session"),
                Err(e) => warn!("terminate failed: {e}"),
            },
            Ok(Command::Event { target, callback_id, payload }) => {
                let queued = session.dispatcher.dispatch(target, &callback_id, || true, payload, || None);
                match queued {
                    Ok(Some(done)) => report(done, &callback_id),
                    Ok(None) => {}
                    Err(e) => warn!("event not queued: {e}"),
                }
            }
            Err(usage) => println!("{usage}"),
        }
    }

    Ok(())
}

fn report(done: Completion, label: &str) {
    let label = label.to_string();
    tokio::spawn(async move {
        match done.wait().await {
            Ok(()) => debug!(%label, "request completed"),
            Err(e) => println!("[{label}] failed: {e}"),
        }
    });
}
