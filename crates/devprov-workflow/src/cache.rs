//! # Stale-Cache Sweep
//!
//! The action the retry executor runs during `DeletingCache`: delete the
//! first deletable stale cache entry on the device's file listing.
//!
//! One attempt re-queries the listing, reads the first entry's `data-id`,
//! clicks its delete control, confirms the modal, and waits for the
//! listing to re-render. References from a previous attempt are never
//! reused; the listing mutates after every deletion. The re-render wait
//! ends early when the run is cancelled; the deletion still counts.

use std::time::Duration;

use async_trait::async_trait;

use devprov_core::{DeviceUiDriver, DeviceUiMap, DriverError, Locator, ProvisionConfig};

use crate::cancel::CancelSignal;
use crate::retry::{AttemptOutcome, RetryAction};

/// Deletes one stale cache entry per attempt.
#[derive(Debug, Clone)]
pub struct StaleCacheSweep {
    entries: Locator,
    ui: DeviceUiMap,
    delete_control_timeout: Duration,
    delete_confirm_timeout: Duration,
    after_delete: Duration,
    cancel: CancelSignal,
}

impl StaleCacheSweep {
    pub fn from_config(config: &ProvisionConfig, cancel: CancelSignal) -> Self {
        Self {
            entries: config.ui.cache_entries(&config.device_url),
            ui: config.ui.clone(),
            delete_control_timeout: config.timeouts.delete_control,
            delete_confirm_timeout: config.timeouts.delete_confirm,
            after_delete: config.delays.after_delete,
            cancel,
        }
    }

    async fn delete_first(
        &self,
        driver: &dyn DeviceUiDriver,
        attempt: u32,
    ) -> Result<AttemptOutcome, DriverError> {
        let entries = driver.find_all(&self.entries).await?;
        let Some(first) = entries.first() else {
            return Ok(AttemptOutcome::NoWork);
        };
        let Some(data_id) = driver.attribute(first, "data-id").await? else {
            return Ok(AttemptOutcome::Fatal(
                "stale cache entry has no data-id attribute".to_string(),
            ));
        };
        tracing::debug!(attempt, data_id = %data_id, remaining = entries.len(), "deleting cache entry");

        let delete = driver
            .wait_clickable(&self.ui.delete_control(&data_id), self.delete_control_timeout)
            .await?;
        driver.click(&delete).await?;

        let confirm = driver
            .wait_clickable(&self.ui.delete_confirm, self.delete_confirm_timeout)
            .await?;
        driver.click(&confirm).await?;

        if !self.cancel.sleep(self.after_delete).await {
            tracing::debug!(attempt, "re-render wait cut short by cancellation");
        }
        Ok(AttemptOutcome::Deleted)
    }
}

#[async_trait]
impl RetryAction for StaleCacheSweep {
    async fn attempt(&self, driver: &dyn DeviceUiDriver, attempt: u32) -> AttemptOutcome {
        self.delete_first(driver, attempt)
            .await
            .unwrap_or_else(AttemptOutcome::from)
    }
}
