//! The "is the FIPS 140-2 continuous test required?" predicate.
//!
//! The kernel flag is the only process-global state in the crate. Each
//! collector can additionally pin the continuous test on or off, which is how
//! the self-test path gets exercised on hosts that do not run in FIPS mode.

use std::sync::OnceLock;

/// Per-collector policy for the FIPS 140-2 continuous self-test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FipsCheck {
    /// Follow the host: the test runs iff the kernel is in FIPS mode.
    #[default]
    Auto,
    /// Always run the continuous test.
    Enabled,
    /// Never run the continuous test.
    Disabled,
}

/// Whether the host kernel runs in FIPS mode.
///
/// Read once per process from `/proc/sys/crypto/fips_enabled` on Linux;
/// always `false` on other platforms.
pub fn fips_enabled() -> bool {
    static KERNEL_FIPS: OnceLock<bool> = OnceLock::new();
    *KERNEL_FIPS.get_or_init(|| {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_to_string("/proc/sys/crypto/fips_enabled")
                .map(|flag| flag.trim() == "1")
                .unwrap_or(false)
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    })
}

/// Resolve a collector's policy against the host flag.
pub(crate) fn continuous_test_active(check: FipsCheck) -> bool {
    match check {
        FipsCheck::Auto => fips_enabled(),
        FipsCheck::Enabled => true,
        FipsCheck::Disabled => false,
    }
}
