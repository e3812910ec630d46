//! Pure formatting and coercion helpers shared by the WarungPay client crates.
//!
//! Nothing in here holds state or touches I/O.

pub mod address;
pub mod convert;
pub mod currency;
pub mod locale;

pub use address::{short_address, truncate_address};
pub use convert::{
    DATE_FIELDS, format_timestamp, optional_timestamp, parse_number_or_zero, parse_timestamp,
    parse_timestamp_or_now, revive_dates, timestamp_value_or_now,
};
pub use currency::{format_currency, format_date};
pub use locale::{Currency, Language};
