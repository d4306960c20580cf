//! Simulation-wide defaults.
//!
//! There are no environment variables and no persisted state: every one of
//! these is a plain constant that a constructor defaults to and a caller
//! may override at construction time.

/// Per-host constant modeling input-queue service time.
pub const NODAL_PROCESSING_DELAY_NS: u64 = 20_000;

/// Interframe gap, in bittimes (802.3).
pub const IFG_BITTIMES: u64 = 96;

/// Backoff slot time, in bittimes (802.3).
pub const SLOT_TIME_BITTIMES: u64 = 512;

/// ARP cache entry lifetime.
pub const ARP_ENTRY_TTL_NS: u64 = 10 * 60 * 1_000_000_000;

/// Truncated binary exponential backoff gives up after this many attempts.
pub const MAX_RETRANSMISSIONS: u32 = 15;

/// Exponent cap for the backoff window (2^min(n, CAP) slots).
pub const BACKOFF_EXPONENT_CAP: u32 = 10;

/// Default capacity of a NIC's/bridge port's output FIFO.
pub const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 64;

/// Default capacity of a host's global IP input queue.
pub const DEFAULT_INPUT_QUEUE_CAPACITY: usize = 128;

/// Minimum and maximum Ethernet payload, per 802.3.
pub const MIN_FRAME_PAYLOAD: usize = 46;
pub const MAX_FRAME_PAYLOAD: usize = 1500;

/// Default interface MTU (no options, matches max frame payload).
pub const DEFAULT_MTU: usize = 1500;

/// Default TTL stamped on freshly originated IPv4 packets.
pub const DEFAULT_TTL: u8 = 64;

/// Pseudo-random deferral window used when a NIC finds the medium busy
/// before it has even started its IFG countdown.
pub const DEFER_RETRY_MIN_NS: u64 = 10_000;
pub const DEFER_RETRY_MAX_NS: u64 = 15_000;

/// Width of the reassembly union-find: IPv4 total length is a 16-bit field.
pub const REASSEMBLY_SPACE: usize = 65_536;
