//! Generated keys for INSERTs that omit the key column.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use shardline_types::ShardValue;

/// Source of unique keys for generated-key columns.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    fn generate_key(&self) -> ShardValue;
}

/// 2016-11-01T00:00:00Z in milliseconds.
pub const KEY_EPOCH_MS: u64 = 1_477_958_400_000;

const SEQUENCE_BITS: u32 = 12;
const WORKER_BITS: u32 = 10;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Default)]
struct SequenceState {
    last_ms: u64,
    sequence: u64,
}

/// Time-ordered 63-bit keys: milliseconds since [`KEY_EPOCH_MS`], a 10-bit
/// worker id, and a 12-bit per-millisecond sequence.
///
/// A clock that steps backwards keeps issuing keys from the last observed
/// millisecond, so keys stay unique and increasing.
pub struct TimeSequenceKeyGenerator {
    worker_id: u64,
    clock: fn() -> u64,
    state: Mutex<SequenceState>,
}

impl TimeSequenceKeyGenerator {
    /// `worker_id` is masked to 10 bits.
    #[must_use]
    pub fn new(worker_id: u16) -> Self {
        Self::with_clock(worker_id, system_millis)
    }

    /// Generator reading wall-clock milliseconds from `clock`.
    #[must_use]
    pub fn with_clock(worker_id: u16, clock: fn() -> u64) -> Self {
        Self {
            worker_id: u64::from(worker_id & MAX_WORKER_ID),
            clock,
            state: Mutex::new(SequenceState::default()),
        }
    }

    #[must_use]
    pub fn worker_id(&self) -> u16 {
        // masked to 10 bits in the constructor
        u16::try_from(self.worker_id).unwrap_or(MAX_WORKER_ID)
    }

    fn next_raw(&self) -> u64 {
        let mut state = self.state.lock();
        let mut now = (self.clock)().saturating_sub(KEY_EPOCH_MS).max(state.last_ms);
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; borrow the next one.
                now += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;
        (now << (SEQUENCE_BITS + WORKER_BITS)) | (self.worker_id << SEQUENCE_BITS) | state.sequence
    }
}

impl Default for TimeSequenceKeyGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for TimeSequenceKeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeSequenceKeyGenerator")
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl KeyGenerator for TimeSequenceKeyGenerator {
    fn generate_key(&self) -> ShardValue {
        ShardValue::Integer(i64::try_from(self.next_raw()).unwrap_or(i64::MAX))
    }
}
