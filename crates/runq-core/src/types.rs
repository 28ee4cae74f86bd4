use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares an integer row identifier newtype.
///
/// Ids are SQLite `INTEGER PRIMARY KEY` values, so ordering by id is
/// ordering by insertion.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }
    };
}

row_id!(
    /// Identifies a run template (reusable app + company + recurrence binding).
    TemplateId
);
row_id!(
    /// Identifies one concrete execution attempt.
    JobId
);
row_id!(
    /// Identifies a pending queue entry.
    QueueEntryId
);
row_id!(
    /// Identifies an application (owned by external CRUD).
    AppId
);
row_id!(
    /// Identifies a company / tenant (owned by external CRUD).
    CompanyId
);
