/// Application name used in user agents and generated module headers
pub const APP_NAME: &str = "Haruki Toolbox";

/// AES block size in bytes (AES-128-CBC game wire format)
pub const AES_BLOCK_SIZE: usize = 16;

/// MessagePack extension type carrying an ordered map `{"k": [...], "v": [...]}`
pub const ORDERED_MAP_EXT: i8 = 100;

/// Fixed encrypted request body used for inherit and mysekai calls (base64)
pub const REQUEST_DATA_GENERAL: &str = "/6O9YhTzP+c8ty/uImK+2w==";

/// Time-to-live of an incomplete chunked upload
pub const CHUNK_TTL_SECS: u64 = 180;

/// Sweeper interval for stale chunk buffers
pub const CHUNK_SWEEP_INTERVAL_SECS: u64 = 60;

/// Time-to-live of a cached public read response
pub const PUBLIC_CACHE_TTL_SECS: u64 = 300;

/// Per-call timeout towards the game API and the sekai-API account check
pub const GAME_API_TIMEOUT_SECS: u64 = 15;

/// Per-call timeout towards third-party sinks
pub const SINK_TIMEOUT_SECS: u64 = 30;

/// Default HTTP request body limit (20 MiB)
pub const DEFAULT_BODY_LIMIT: usize = 20 * 1024 * 1024;

/// Namespace used for public read cache keys
pub const PUBLIC_CACHE_NAMESPACE: &str = "public_access";

/// OAuth2 scope granting read access to game data
pub const SCOPE_GAME_DATA_READ: &str = "game-data:read";

/// Hostname of the crash reporter that generated modules reject
pub const BACKTRACE_HOST: &str = "submit.backtrace.io";

/// JP cookie issuance endpoint
pub const JP_COOKIE_URL: &str = "https://issue.sekai.colorfulpalette.org/api/signature";

/// Fields of `userGamedata` exposed by the public read layer
pub const PUBLIC_GAMEDATA_FIELDS: [&str; 6] = ["userId", "name", "deck", "exp", "totalExp", "coin"];
