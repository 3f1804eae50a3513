//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data in the
//! corresponding `*_statuses` table.

pub use brainns_core::status::{SegmentationStatus, StatusId};

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up the variant for a database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                [$( $name::$variant ),+]
                    .into_iter()
                    .find(|status| status.id() == id)
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Queue job lifecycle status.
    JobStatus {
        /// Waiting for its dependency to finish. Never claimed.
        Deferred = 1,
        Queued = 2,
        Started = 3,
        Finished = 4,
        Failed = 5,
    }
}

impl JobStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, JobStatus::Deferred | JobStatus::Queued)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}
