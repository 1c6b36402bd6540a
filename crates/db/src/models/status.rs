//! Status helper enums mapping to SMALLINT columns.
//!
//! Each enum variant's discriminant matches the id stored in the database
//! and the constants in `autotune_core::scheduling`.

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( v if v == $val => Some(Self::$variant), )+
                    _ => None,
                }
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
    /// Tuning job lifecycle status.
    JobStatus {
        Queued = 1,
        Dispatched = 2,
        Completed = 3,
        Failed = 4,
        /// The execution backend lost the job before it reported back.
        Expired = 5,
    }
}

impl JobStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Queued | Self::Dispatched)
    }

    pub fn name(self) -> &'static str {
        autotune_core::scheduling::state_machine::status_name(self.id())
    }
}
