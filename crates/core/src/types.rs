/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Queue job identifiers share the primary key type of the `jobs` table.
pub type JobId = DbId;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
