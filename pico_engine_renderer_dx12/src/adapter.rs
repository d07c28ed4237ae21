/// Adapter and feature-level selection

use std::sync::Arc;

use pico_engine::native::HResult;
use pico_engine::pico::{PicoError, PicoResult};
use pico_engine::{engine_check, engine_error, engine_info, engine_trace};

use crate::native::{Adapter, Factory, FeatureLevel, GpuPreference};

/// Lowest feature level the backend runs on
pub const MINIMUM_FEATURE_LEVEL: FeatureLevel = FeatureLevel::Level11_0;

/// Levels queried to find the best one a device supports
pub const CANDIDATE_FEATURE_LEVELS: [FeatureLevel; 5] = [
    FeatureLevel::Level11_0,
    FeatureLevel::Level11_1,
    FeatureLevel::Level12_0,
    FeatureLevel::Level12_1,
    FeatureLevel::Level12_2,
];

/// First adapter, in high-performance order, that supports `minimum`
pub fn find_best_adapter(factory: &dyn Factory, minimum: FeatureLevel) -> PicoResult<Arc<dyn Adapter>> {
    let mut index = 0;
    loop {
        let adapter = match factory.enum_adapter_by_gpu_preference(index, GpuPreference::HighPerformance) {
            Ok(adapter) => adapter,
            Err(status) if status == HResult::DXGI_ERROR_NOT_FOUND => break,
            Err(status) => {
                engine_error!("pico::dx12::Adapter", "Adapter enumeration failed at index {}: {}", index, status);
                return Err(PicoError::NoSuitableAdapter(format!("adapter enumeration failed: {}", status)));
            }
        };

        let desc = adapter.desc();
        match factory.check_device_support(adapter.as_ref(), minimum) {
            Ok(()) => {
                engine_info!(
                    "pico::dx12::Adapter",
                    "Selected adapter '{}' ({} MiB dedicated{})",
                    desc.description,
                    desc.dedicated_video_memory >> 20,
                    if desc.software { ", software" } else { "" }
                );
                return Ok(adapter);
            }
            Err(status) => {
                engine_trace!("pico::dx12::Adapter", "Skipping adapter '{}': {}", desc.description, status);
            }
        }
        index += 1;
    }

    engine_error!("pico::dx12::Adapter", "No adapter supports {}", minimum);
    Err(PicoError::NoSuitableAdapter(format!("no adapter supports {}", minimum)))
}

/// Highest candidate level `adapter` supports
///
/// Creates a temporary device at the minimum level to run the query.
pub fn find_max_feature_level(factory: &dyn Factory, adapter: &dyn Adapter) -> PicoResult<FeatureLevel> {
    let probe = engine_check!("pico::dx12::Adapter", factory.create_device(adapter, MINIMUM_FEATURE_LEVEL))?;
    let level = engine_check!(
        "pico::dx12::Adapter",
        probe.check_feature_levels(&CANDIDATE_FEATURE_LEVELS)
    )?;
    engine_info!("pico::dx12::Adapter", "Maximum supported feature level: {}", level);
    Ok(level)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
