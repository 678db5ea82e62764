use crate::{ArchiveError, Batch};

/// A stream of batches that can be deleted after they have been archived.
///
/// `next_batch` models a lazy, finite, non-restartable sequence: every call
/// may suspend on a database round trip, and the first `None` is final.
pub trait Source {
    fn name(&self) -> &str;

    /// Whether batches should be written to destinations at all.
    fn archive_data(&self) -> bool;

    /// Whether archived batches should be hard-deleted from the source.
    fn delete_data(&self) -> bool;

    /// Next page of eligible rows, or `None` once every planned table has
    /// been drained.
    fn next_batch(&mut self) -> Result<Option<Batch>, ArchiveError>;

    /// Delete the given batch from the source. Implementations must be safe
    /// to call with rows that were already deleted by an earlier run.
    fn delete(&mut self, batch: &Batch) -> Result<(), ArchiveError>;

    fn clean_exit(&mut self) -> Result<(), ArchiveError>;
}

/// An archive sink. Writes must be idempotent so that reruns and retries
/// never duplicate data.
pub trait Destination {
    fn name(&self) -> &str;

    fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError>;

    fn clean_exit(&mut self) -> Result<(), ArchiveError>;
}
