use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::config::BroadcastConfig;
use crate::error::Result;
use crate::reading::ReadingSource;
use crate::session::{BroadcastSession, SessionOutcome};
use crate::transport::TransportManager;

/// Establishes the configured transport and broadcasts from `source` until
/// cancelled or a fatal error occurs.
///
/// Cancelling while waiting for a TCP peer ends the run successfully without
/// sending anything.
pub async fn run_broadcast<R: ReadingSource>(
    config: &BroadcastConfig,
    source: R,
    cancel: CancellationToken,
) -> Result<SessionOutcome> {
    config.validate()?;
    let manager = TransportManager::new(config);

    let established = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Cancelled before the {} transport was established", manager.mode());
            return Ok(SessionOutcome::cancelled());
        }
        established = manager.establish() => established,
    };
    let mut endpoint = established.inspect_err(|e| error!("{e}"))?;

    let mut session = BroadcastSession::new(
        source,
        config.cycle_sentences(),
        config.delay_duration(),
    )
    .with_max_cycles(config.cycles);
    session.run(&mut endpoint, &cancel).await
}
