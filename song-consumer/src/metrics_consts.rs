pub const MESSAGES_RECEIVED: &str = "song_consumer_messages_received";
pub const RECORDS_STORED: &str = "song_consumer_records_stored";
pub const MESSAGES_DROPPED: &str = "song_consumer_messages_dropped";
pub const FIELDS_DEFAULTED: &str = "song_consumer_fields_defaulted";
pub const RECV_ERRORS: &str = "song_consumer_recv_errors";
pub const RENDER_FAILED: &str = "song_consumer_render_failed";
pub const MESSAGE_PROCESSING_TIME: &str = "song_consumer_message_processing_ms";
pub const PROJECTION_RECOMPUTE_TIME: &str = "song_consumer_projection_recompute_ms";
