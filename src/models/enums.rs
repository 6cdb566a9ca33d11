use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(MedicationForm {
    Tablet => "tablet",
    Capsule => "capsule",
    Syrup => "syrup",
    Injection => "injection",
    Ointment => "ointment",
    Drops => "drops",
    Inhalation => "inhalation",
    Other => "other",
});

// Lifecycle status. Never stored; derived per read from the date fields.
str_enum!(MedicationStatus {
    Upcoming => "upcoming",
    Active => "active",
    Expired => "expired",
});
