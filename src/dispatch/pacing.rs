use crate::config::DispatchConfig;
use std::time::Duration;

/// Wait before sending the item at `index` of a batch of `batch_len`.
///
/// Small batches (up to `chunk_size`) back off linearly: `base_delay * index`.
/// Larger batches are cut into chunks of `chunk_size`; the first item of each
/// chunk after the first waits `chunk_delay`, every other item `base_delay`.
pub fn delay_before(config: &DispatchConfig, index: usize, batch_len: usize) -> Duration {
    if index == 0 {
        return Duration::ZERO;
    }

    let chunk_size = config.chunk_size.max(1);
    if batch_len <= chunk_size {
        let factor = u32::try_from(index).unwrap_or(u32::MAX);
        config.base_delay.saturating_mul(factor)
    } else if index % chunk_size == 0 {
        config.chunk_delay
    } else {
        config.base_delay
    }
}
