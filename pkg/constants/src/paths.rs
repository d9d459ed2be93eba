//! Filesystem path constants.

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/edgenet/config.yaml";

/// Data directory value that selects the ephemeral in-memory store.
pub const MEMORY_DATA_DIR: &str = "memory://";

/// Default HTTP port for the server API.
pub const DEFAULT_SERVER_PORT: u16 = 8443;
