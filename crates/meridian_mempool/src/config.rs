use std::path::PathBuf;

/// Tunable mempool policy. Constants that are consensus-adjacent (pool byte
/// cap, orphan limits, rate-limit window) live at the crate root.
#[derive(Clone, Debug)]
pub struct MempoolConfig {
    /// Transactions below this fee rate are rejected outright when rate
    /// limiting is requested.
    pub min_fee_rate_nanos_per_kb: u64,
    /// Transactions below this fee rate are subjected to the low-fee decay
    /// accumulator.
    pub rate_limit_fee_rate_nanos_per_kb: u64,
    /// Whether the lock-free read snapshot is maintained.
    pub generate_read_snapshot: bool,
    /// The read snapshot regenerates after this many seconds...
    pub snapshot_regeneration_interval_secs: f64,
    /// ...or after this many processed transactions, whichever fires first.
    pub snapshot_regeneration_interval_txns: u64,
    /// Root directory for the three-slot mempool dump rotation. `None`
    /// disables persistence entirely.
    pub dump_dir: Option<PathBuf>,
    /// Whether the constructor replays the newest complete dump.
    pub load_dump_on_startup: bool,
    /// Seconds between persistence dumps.
    pub dump_interval_secs: u64,
    /// Minimum seconds between orphan expiry sweeps.
    pub orphan_expiry_scan_interval_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            min_fee_rate_nanos_per_kb: 0,
            rate_limit_fee_rate_nanos_per_kb: 0,
            generate_read_snapshot: true,
            snapshot_regeneration_interval_secs: 1.0,
            snapshot_regeneration_interval_txns: 1000,
            dump_dir: None,
            load_dump_on_startup: false,
            dump_interval_secs: 30,
            orphan_expiry_scan_interval_secs: 60,
        }
    }
}
