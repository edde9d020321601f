/// How often clients are expected to send `heartbeat`, in milliseconds.
pub const HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// A user whose last heartbeat is older than this is considered gone
/// (three missed heartbeats).
pub const PRESENCE_TIMEOUT_MS: u64 = 30_000;

/// Public URL prefix under which uploaded attachments are served.
pub const UPLOADS_URL_PREFIX: &str = "/messages_uploads";

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP/WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Capacity of each connection's outbound event queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Upper bound on room id length.
pub const MAX_ROOM_ID_LEN: usize = 128;
