mod backend;
mod batch;
mod error;
mod meta;
mod traits;
mod value;

pub use backend::{DestinationBackend, SourceBackend};
pub use batch::{Batch, Row, TableRef};
pub use error::{ArchiveError, DbError};
pub use meta::{FkEdge, TableMeta};
pub use traits::{Destination, Source};
pub use value::Value;
