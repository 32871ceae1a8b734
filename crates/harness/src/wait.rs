use core::time::Duration;

use tokio::time::sleep;

use crate::error::HarnessError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DELAY: Duration = Duration::from_millis(50);
/// Shortest polling delay; a zero delay would never use up the timeout.
pub const MIN_DELAY: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub delay: Duration,
}

impl WaitOptions {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            delay: DEFAULT_DELAY,
        }
    }

    #[must_use]
    pub const fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Polls `condition` every `options.delay` until it holds.
///
/// A condition that already holds returns without sleeping. Elapsed time is
/// accounted in whole delay increments, so a condition that never holds
/// fails once the accumulated delay reaches `options.timeout`. Delays below
/// [`MIN_DELAY`] are raised to it.
pub async fn wait_or_fail<F>(
    message: &str,
    options: WaitOptions,
    mut condition: F,
) -> Result<(), HarnessError>
where
    F: FnMut() -> bool,
{
    let delay = options.delay.max(MIN_DELAY);
    let mut elapsed = Duration::ZERO;

    while !condition() {
        elapsed = elapsed.saturating_add(delay);

        if elapsed >= options.timeout {
            return Err(HarnessError::SyncTimeout {
                message: message.to_owned(),
            });
        }

        sleep(delay).await;
    }

    Ok(())
}
