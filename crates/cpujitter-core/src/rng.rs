//! `rand` ecosystem adapter.
//!
//! Available only with the optional `rand_core` feature. The collector is a
//! fallible generator — the continuous self-test can poison it — so it
//! implements [`TryRngCore`] rather than the infallible trait.

use rand_core::TryRngCore;

use crate::collector::{Collector, CollectorError};

impl TryRngCore for Collector {
    type Error = CollectorError;

    fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn try_fill_bytes(&mut self, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.read(dst).map(|_| ())
    }
}
