pub mod check;
pub mod fetch;
pub mod quality;

use cpujitter_core::CollectorConfig;

/// Build a collector config from the shared CLI switches.
pub fn collector_config(
    osr: u32,
    no_memory_access: bool,
    no_stir: bool,
    no_unbias: bool,
) -> CollectorConfig {
    CollectorConfig {
        osr,
        memory_access: !no_memory_access,
        stir: !no_stir,
        unbias: !no_unbias,
        ..CollectorConfig::default()
    }
}
