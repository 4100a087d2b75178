//! Time-ordered message identifiers.
//!
//! A [`MessageId`] packs whole seconds since the Unix epoch into the high bits
//! and a per-second sequence counter into the low [`COUNTER_BITS`] bits.
//!
//! Capacity is `2^20 - 1` ids per second per allocator. Past that the counter
//! wraps to zero and ids minted later in the same second collide with earlier
//! ones. This is a hard limit, not an error. Allocators are per process and
//! must not be shared across processes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Low bits reserved for the per-second counter.
pub const COUNTER_BITS: u32 = 20;

/// Mask selecting the counter bits.
pub const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Packed `(seconds, counter)` identifier.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

/// Decomposed form of a [`MessageId`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageIdParts {
    /// Whole seconds since the Unix epoch.
    pub timestamp_secs: u64,
    /// Sequence number within that second.
    pub counter: u64,
}

impl MessageId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn compose(timestamp_secs: u64, counter: u64) -> Self {
        Self((timestamp_secs << COUNTER_BITS) | (counter & COUNTER_MASK))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn parse(self) -> MessageIdParts {
        MessageIdParts {
            timestamp_secs: self.0 >> COUNTER_BITS,
            counter: self.0 & COUNTER_MASK,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Default)]
struct AllocState {
    last_second: u64,
    counter: u64,
}

/// Mints [`MessageId`]s. One instance per process (or per shard), passed
/// explicitly to every call site.
pub struct MessageIdAllocator {
    state: Mutex<AllocState>,
    clock: Clock,
}

impl MessageIdAllocator {
    /// Allocator driven by the system wall clock.
    pub fn new() -> Self {
        Self::with_clock(system_millis)
    }

    /// Allocator driven by a custom clock returning Unix milliseconds.
    pub fn with_clock(clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(AllocState::default()),
            clock: Arc::new(clock),
        }
    }

    /// Mint the next identifier.
    ///
    /// A wall clock that steps backwards keeps the last observed second so
    /// ids never decrease.
    pub fn next(&self) -> MessageId {
        let now_secs = (self.clock)() / 1000;
        let mut state = self.state.lock();
        let second = now_secs.max(state.last_second);
        if second != state.last_second {
            state.last_second = second;
            state.counter = 0;
        }
        state.counter = (state.counter + 1) & COUNTER_MASK;
        MessageId::compose(second, state.counter)
    }

    /// Decompose an identifier minted by any allocator using this layout.
    pub fn parse(id: MessageId) -> MessageIdParts {
        id.parse()
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn system_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
