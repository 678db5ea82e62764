mod convert;
mod dialect;
mod gateway;
mod hints;

pub use dialect::{escape_string, qualified_name, quote_ident};
pub use gateway::{DbOutcome, DbRequest, Gateway, GatewayConfig};
pub use hints::{FkViolation, fix_hint, parse_fk_violation, select_hint};
