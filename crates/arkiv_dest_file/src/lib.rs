mod compress;
mod csv_writer;
mod destination;
mod sql_writer;

pub use compress::compress;
pub use destination::{ArchiveFormat, FileDestConfig, FileDestination, FileFormat};
