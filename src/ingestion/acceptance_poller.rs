use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::dataset::common_structs::{AssetDescriptor, AssetId, AssetStatus, DatasetId};
use crate::dataset::DataService;
use crate::error::IngestError;

/// Waits between two status checks
#[async_trait]
pub trait Pause {
    async fn pause(&self, duration: Duration);
}

pub struct AsyncStdPause;

#[async_trait]
impl Pause for AsyncStdPause {
    async fn pause(&self, duration: Duration) {
        async_std::task::sleep(duration).await;
    }
}

/// Checks an asset's status at a fixed interval until the service accepts it.
///
/// At most `max_attempts` checks are made. Dropping the returned future stops polling; all
/// asset state lives on the service, so nothing has to be undone locally.
pub struct AcceptancePoller<P = AsyncStdPause> {
    interval: Duration,
    max_attempts: u32,
    pause: P,
}

impl AcceptancePoller<AsyncStdPause> {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        AcceptancePoller::with_pause(interval, max_attempts, AsyncStdPause)
    }
}

impl<P: Pause> AcceptancePoller<P> {
    pub fn with_pause(interval: Duration, max_attempts: u32, pause: P) -> Self {
        AcceptancePoller {
            interval,
            max_attempts: max_attempts.max(1),
            pause,
        }
    }

    pub async fn wait_until_accepted<S: DataService + Sync + ?Sized>(
        &self,
        service: &S,
        asset_id: &AssetId,
        dataset_id: &DatasetId,
    ) -> Result<AssetDescriptor, IngestError> {
        for attempt in 1..=self.max_attempts {
            let asset = service
                .get_asset(asset_id, dataset_id, false)
                .await
                .map_err(|e| IngestError::remote(asset_id.to_string(), e))?;
            match asset.status {
                Some(AssetStatus::Accepted) => return Ok(asset),
                Some(AssetStatus::Rejected) => {
                    return Err(IngestError::AssetRejected {
                        asset_id: asset_id.to_string(),
                    })
                }
                status => debug!(
                    "Asset {} status {:?} ({}/{}), checking again in {:?}",
                    asset_id, status, attempt, self.max_attempts, self.interval
                ),
            }
            if attempt < self.max_attempts {
                self.pause.pause(self.interval).await;
            }
        }
        Err(IngestError::PollTimeout {
            asset_id: asset_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}
