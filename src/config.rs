//! Compile-time configuration constants, in a flat `pub const` layout.

/// Size of the shared-memory window mapped into each out-of-process worker.
pub const SHM_WINDOW_SIZE: usize = 16 * 1024;

/// Initial size of a worker channel's reassembly buffer.
pub const REASSEMBLY_BUF_INITIAL: usize = 1024;

/// Reassembly buffer doubles on growth but is never grown past this size;
/// exceeding it destroys the channel.
pub const REASSEMBLY_BUF_MAX: usize = 32 * 1024 * 1024;

/// Largest `value_size` a META frame may carry before the worker is treated
/// as malicious and its channel destroyed.
pub const META_VALUE_MAX: usize = 32 * 1024 * 1024;

/// Multiplex wait timeout per round-scheduler iteration.
pub const MULTIPLEX_TIMEOUT_MS: u64 = 500;

/// Upper bound on how much of a file-backed [`crate::source::BufferedSource`]
/// is held in memory at once.
pub const BUFFERED_SOURCE_CAP: usize = 4 * 1024 * 1024;

/// Prefix used when naming the shared-memory object, mirroring
/// `extractor_ipc_gnu.c`'s `/libextractor-shm-<pid>-<rand>` scheme.
pub const SHM_NAME_PREFIX: &str = "/metasift-shm";
