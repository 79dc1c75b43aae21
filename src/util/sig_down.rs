//! Graceful-shutdown signal wiring.

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;

/// Returns a token that is cancelled when SIGTERM or SIGINT arrives.
///
/// The token fans out to the HTTP server and the side-channel workers, so
/// in-flight settlements drain before the process exits. Returns an error if
/// signal registration fails.
pub fn shutdown_token() -> Result<CancellationToken, std::io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        trigger.cancel();
    });
    Ok(token)
}
