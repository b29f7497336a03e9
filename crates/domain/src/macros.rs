//! Macro for the string form of status and label enums
//!
//! Every status-like enum in the domain is stored in SQLite, exported as a
//! Prometheus label and parsed back from URL paths, so all of them need the
//! same lowercase wire names.
//!
//! # Example
//!
//! ```rust
//! use ledgerlink_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum PayoutStatus {
//!     Scheduled,
//!     Paid,
//! }
//!
//! impl_domain_status_conversions!(PayoutStatus {
//!     Scheduled => "scheduled",
//!     Paid => "paid",
//! });
//!
//! assert_eq!(PayoutStatus::Paid.as_str(), "paid");
//! assert_eq!("SCHEDULED".parse::<PayoutStatus>(), Ok(PayoutStatus::Scheduled));
//! ```

/// Implements `as_str`, `VARIANTS`, `Display` and `FromStr` for an enum
///
/// Parsing is ASCII case-insensitive; the error names the enum and the
/// rejected input.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Every variant, in declaration order
            pub const VARIANTS: &'static [Self] = &[$(Self::$variant),+];

            /// Lowercase wire name
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Self::VARIANTS
                    .iter()
                    .copied()
                    .find(|variant| variant.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| format!("Invalid {}: {}", stringify!($enum_name), s))
            }
        }
    };
}
