//! Configuration inputs consumed by the core.
//!
//! Loading these from a config file is out of scope; this module only
//! describes the shapes the core accepts, as plain structs and enums a
//! caller builds from whatever configuration source it already has.

use crate::error::CoreError;

/// A partition's over-subscription policy, which determines its row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverSubscribe {
    /// One job per core at a time: `num_rows == 1`.
    Exclusive,
    /// Shared, up to `k` overlapping jobs per core: `num_rows == k`.
    Force(u32),
    /// Shared when the partition is otherwise idle, up to `k`: same
    /// `num_rows` effect as `Force` from the core's point of view - the
    /// distinction only matters to the scheduler that decides *whether*
    /// to share, which is out of scope here.
    Yes(u32),
}

impl OverSubscribe {
    /// Parses an `OverSubscribe=` partition config value.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("exclusive") {
            return Ok(OverSubscribe::Exclusive);
        }
        if let Some(rest) = s
            .strip_prefix("FORCE:")
            .or_else(|| s.strip_prefix("force:"))
        {
            let k: u32 = rest
                .parse()
                .map_err(|_| CoreError::BadArgument(format!("invalid FORCE count: {rest}")))?;
            return Ok(OverSubscribe::Force(k.max(1)));
        }
        if let Some(rest) = s.strip_prefix("YES:").or_else(|| s.strip_prefix("yes:")) {
            let k: u32 = rest
                .parse()
                .map_err(|_| CoreError::BadArgument(format!("invalid YES count: {rest}")))?;
            return Ok(OverSubscribe::Yes(k.max(1)));
        }
        Err(CoreError::BadArgument(format!(
            "unknown over-subscription policy: {s}"
        )))
    }

    /// The number of rows a partition with this policy should have.
    pub fn num_rows(&self) -> u32 {
        match self {
            OverSubscribe::Exclusive => 1,
            OverSubscribe::Force(k) | OverSubscribe::Yes(k) => *k,
        }
    }
}

impl std::fmt::Display for OverSubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverSubscribe::Exclusive => write!(f, "EXCLUSIVE"),
            OverSubscribe::Force(k) => write!(f, "FORCE:{k}"),
            OverSubscribe::Yes(k) => write!(f, "YES:{k}"),
        }
    }
}

/// Per-partition configuration consumed when jobs are added/removed.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Over-subscription policy this partition's row count is derived from.
    pub over_subscribe: OverSubscribe,
}

impl PartitionConfig {
    pub fn num_rows(&self) -> u32 {
        self.over_subscribe.num_rows()
    }
}

/// Whether configured or live-detected node counts drive accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FastSchedule {
    /// 0: always use actually-detected counts.
    Actual,
    /// 1: always use the counts from node configuration.
    #[default]
    Configured,
    /// 2: use configured counts only where actual counts are unavailable.
    ConfiguredIfSet,
}

impl FastSchedule {
    pub fn from_u8(v: u8) -> Result<Self, CoreError> {
        match v {
            0 => Ok(FastSchedule::Actual),
            1 => Ok(FastSchedule::Configured),
            2 => Ok(FastSchedule::ConfiguredIfSet),
            other => Err(CoreError::BadArgument(format!(
                "invalid select_fast_schedule value: {other}"
            ))),
        }
    }
}

/// Injected form of a process-global debug-flags bitset: read by the
/// core but never written by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugFlags(u32);

impl DebugFlags {
    pub const NONE: DebugFlags = DebugFlags(0);
    /// Trace row-placement decisions (candidate row tried/rejected).
    pub const ROW_PACKING: DebugFlags = DebugFlags(1 << 0);
    /// Trace reservation placement candidate selection.
    pub const RESERVATION: DebugFlags = DebugFlags(1 << 1);

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(&self, flag: DebugFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn with(self, flag: DebugFlags) -> Self {
        Self(self.0 | flag.0)
    }
}

/// Top-level scheduler-wide configuration consumed by the aggregator and
/// core-map builder.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub fast_schedule: FastSchedule,
    pub debug_flags: DebugFlags,
}
