use super::*;
use crate::headless::{GpuTimeline, HeadlessAdapterSpec, HeadlessCall, HeadlessFactory};

fn factory(adapters: Vec<HeadlessAdapterSpec>) -> HeadlessFactory {
    HeadlessFactory::with_adapters(GpuTimeline::Immediate, adapters)
}

#[test]
fn test_best_adapter_prefers_high_performance() {
    let factory = factory(vec![
        HeadlessAdapterSpec::hardware("Integrated", FeatureLevel::Level12_0, 512 << 20),
        HeadlessAdapterSpec::hardware("Discrete", FeatureLevel::Level12_1, 8 << 30),
    ]);

    let adapter = find_best_adapter(&factory, MINIMUM_FEATURE_LEVEL).unwrap();
    assert_eq!(adapter.desc().description, "Discrete");
}

#[test]
fn test_best_adapter_skips_unsupported() {
    let factory = factory(vec![
        HeadlessAdapterSpec::unsupported("Legacy", 16 << 30),
        HeadlessAdapterSpec::software("Software Rasterizer", FeatureLevel::Level12_1),
    ]);

    let adapter = find_best_adapter(&factory, MINIMUM_FEATURE_LEVEL).unwrap();
    assert_eq!(adapter.desc().description, "Software Rasterizer");
    assert!(adapter.desc().software);
}

#[test]
fn test_best_adapter_respects_minimum_level() {
    let factory = factory(vec![HeadlessAdapterSpec::hardware("Old", FeatureLevel::Level11_1, 2 << 30)]);

    assert!(find_best_adapter(&factory, FeatureLevel::Level11_0).is_ok());
    let err = find_best_adapter(&factory, FeatureLevel::Level12_0).err().unwrap();
    assert!(matches!(err, PicoError::NoSuitableAdapter(_)));
}

#[test]
fn test_no_adapter_at_all() {
    let factory = factory(Vec::new());
    let err = find_best_adapter(&factory, MINIMUM_FEATURE_LEVEL).err().unwrap();
    assert!(matches!(err, PicoError::NoSuitableAdapter(_)));
    assert_eq!(err.kind_name(), "Adapter Selection Failure");
}

#[test]
fn test_max_feature_level() {
    for level in CANDIDATE_FEATURE_LEVELS {
        let factory = factory(vec![HeadlessAdapterSpec::hardware("GPU", level, 4 << 30)]);
        let adapter = find_best_adapter(&factory, MINIMUM_FEATURE_LEVEL).unwrap();
        assert_eq!(find_max_feature_level(&factory, adapter.as_ref()).unwrap(), level);
    }
}

#[test]
fn test_max_feature_level_reports_device_failure() {
    let factory = factory(vec![HeadlessAdapterSpec::hardware("GPU", FeatureLevel::Level12_2, 4 << 30)]);
    let adapter = find_best_adapter(&factory, MINIMUM_FEATURE_LEVEL).unwrap();

    factory.fail_next(HeadlessCall::CreateDevice, HResult::DXGI_ERROR_DEVICE_REMOVED);
    let err = find_max_feature_level(&factory, adapter.as_ref()).unwrap_err();
    assert_eq!(err.status(), Some(HResult::DXGI_ERROR_DEVICE_REMOVED));
}
