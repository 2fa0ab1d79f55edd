/// Job identifiers are UUIDs, serialized as strings on the wire.
pub type JobId = uuid::Uuid;

/// Worker identifiers are free-form validated names (see [`crate::worker`]).
pub type WorkerId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
