/// Buffer size for copying file content (64KB)
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Largest control-channel frame we accept (64KB)
pub const MAX_MSG_SIZE: usize = 64 * 1024;

/// Phrase a compatible peer sends first on the control channel
pub const HANDSHAKE_MESSAGE: &str = "Request LocalShare File Sharing";

/// Maximum filename length (255 bytes)
pub const MAX_FILENAME_LENGTH: usize = 255;
