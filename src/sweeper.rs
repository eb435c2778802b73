use chrono::{DateTime, Utc};
use deskcore::store::{OutOfTicketStore, StoreError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const OUT_OF_TICKET_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Deletes out-of-ticket records created more than `retention` before `now`.
pub async fn sweep_out_of_ticket(
    store: &dyn OutOfTicketStore,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| StoreError::Backend(format!("retention out of range: {e}").into()))?;
    // a retention reaching past the earliest representable instant keeps everything
    let cutoff = now
        .checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let purged = store.purge_out_of_ticket_before(cutoff).await?;
    if purged > 0 {
        info!(target: "Sweeper", "Purged {purged} out-of-ticket messages older than {cutoff}");
    } else {
        debug!(target: "Sweeper", "Nothing older than {cutoff} to purge");
    }
    Ok(purged)
}

pub fn spawn_out_of_ticket_sweeper(
    store: Arc<dyn OutOfTicketStore>,
    retention: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_out_of_ticket(store.as_ref(), retention, Utc::now()).await {
                warn!(target: "Sweeper", "Out-of-ticket sweep failed: {e}");
            }
        }
    })
}
