// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Registry statistics.
//!
//! [`RegistryStats`] counts token traffic and memory pressure so the
//! budget can be sized from real workloads.

/// Cumulative statistics about registry usage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryStats {
    /// Buffers successfully allocated.
    pub allocations: u64,
    /// Buffers released (last handle dropped).
    pub releases: u64,
    /// Allocations whose token came from the free list.
    pub token_reuses: u64,
    /// Allocations refused for lack of budget.
    pub oom_count: u64,
    /// High-water mark of live buffer bytes.
    pub peak_allocated_bytes: usize,
}

impl RegistryStats {
    /// Fraction of allocations that recycled a released token.
    pub fn token_reuse_ratio(&self) -> f64 {
        if self.allocations == 0 {
            return 0.0;
        }
        self.token_reuses as f64 / self.allocations as f64
    }

    pub(crate) fn record_allocation(&mut self, reused_token: bool, live_bytes: usize) {
        self.allocations += 1;
        if reused_token {
            self.token_reuses += 1;
        }
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(live_bytes);
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    /// Number of buffers currently alive.
    pub fn live_buffers(&self) -> u64 {
        self.allocations - self.releases
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Buffers: {} allocated ({} live, {} reused tokens), {} released, {} OOMs, peak {} bytes",
            self.allocations,
            self.live_buffers(),
            self.token_reuses,
            self.releases,
            self.oom_count,
            self.peak_allocated_bytes,
        )
    }
}
