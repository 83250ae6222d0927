//! Stop conditions for a listener session.
//!
//! An operator stops a device listener by typing `q`; an edge module is stopped by the
//! runtime with SIGTERM.

use std::io::{self, BufRead, Write};
use std::thread;

use tokio::sync::oneshot;

const PROMPT: &str = "enter q and return to quit";

/// Whether an input line asks to quit. Only `q` and `Q` do.
pub fn is_quit_token(line: &str) -> bool {
    matches!(line.trim_end_matches(&['\r', '\n'][..]), "q" | "Q")
}

/// Why [`wait_for_quit`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    /// The operator typed a quit token
    Requested,
    /// Input ran out before a quit token was seen
    EndOfInput,
}

/// Prompt on `prompt` and read lines from `input` until the operator quits.
///
/// Blocks the calling thread.
pub fn wait_for_quit<R, W>(mut input: R, mut prompt: W) -> io::Result<QuitReason>
where
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        writeln!(prompt, "{}", PROMPT)?;
        prompt.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(QuitReason::EndOfInput);
        }
        if is_quit_token(&line) {
            info!("quitting...");
            return Ok(QuitReason::Requested);
        }
    }
}

/// Resolves once the operator quits on stdin.
///
/// The blocking read runs on its own thread so event delivery keeps going meanwhile. The
/// thread only reports back through a channel.
pub async fn operator_quit() {
    let (done_tx, done_rx) = oneshot::channel();

    let spawned = thread::Builder::new()
        .name("stdin-listener".into())
        .spawn(move || {
            let stdin = io::stdin();
            let result = wait_for_quit(stdin.lock(), io::stdout());
            let _ = done_tx.send(result);
        });
    if let Err(e) = spawned {
        error!("could not start stdin listener: {}", e);
        return;
    }

    match done_rx.await {
        Ok(Ok(QuitReason::Requested)) => {}
        Ok(Ok(QuitReason::EndOfInput)) => warn!("stdin closed, stopping listener"),
        Ok(Err(e)) => error!("error reading stdin, stopping listener: {}", e),
        Err(_) => error!("stdin listener exited unexpectedly"),
    }
}

/// Resolves when the process is asked to terminate (SIGTERM, or Ctrl-C).
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = terminate.recv() => {}
                    _ = ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!("could not install SIGTERM handler: {}", e);
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;

    info!("stop requested by the runtime");
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for ctrl-c: {}", e);
        futures::future::pending::<()>().await;
    }
}
