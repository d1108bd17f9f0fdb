// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Number of dimension slots per metric: 16 numbered keys plus the string key.
pub const MAX_DIMENSIONS: usize = 17;

/// Slot index of the string key.
pub const STRING_KEY_SLOT: usize = 16;

/// Key names as the collector expects them, indexed by slot.
pub const DIMENSION_NAMES: [&str; MAX_DIMENSIONS] = [
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "_s",
];

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SPLITS_MAX: usize = 16;
pub const DEFAULT_AGGREGATE_VALUES: usize = 24;

/// Fractional digits carried by value samples (fixed point, scaled by 10^8).
pub const VALUE_FRACTION_DIGITS: u32 = 8;
pub const VALUE_SCALE: f64 = 100_000_000.0;
