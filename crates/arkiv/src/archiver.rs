use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arkiv_core::{ArchiveError, Batch, Destination, Source};
use log::{error, info};

/// One archiving pipeline: a single source fanned out to its destinations.
///
/// Runs strictly sequentially: every batch is written to every destination
/// before its rows are deleted from the source, and a failed write skips the
/// deletion for that batch only.
pub struct Archiver {
    name: String,
    src: Box<dyn Source>,
    dst: Vec<Box<dyn Destination>>,
    interrupted: Arc<AtomicBool>,
}

impl Archiver {
    pub fn new(
        name: String,
        src: Box<dyn Source>,
        dst: Vec<Box<dyn Destination>>,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name,
            src,
            dst,
            interrupted,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&mut self) -> Result<(), ArchiveError> {
        if !self.src.archive_data() && !self.src.delete_data() {
            info!(
                "nothing to do for archiver {}: archive_data and delete_data are disabled",
                self.name
            );
            return Ok(());
        }
        if !self.src.delete_data() {
            info!("data won't be deleted because delete_data is disabled");
        }

        let result = self.pump();
        self.clean_exit();
        result
    }

    fn pump(&mut self) -> Result<(), ArchiveError> {
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                info!("interrupt received, stopping archiver {}", self.name);
                return Err(ArchiveError::Interrupted);
            }

            let Some(batch) = self.src.next_batch()? else {
                return Ok(());
            };

            if self.src.archive_data() && self.write(&batch).is_err() {
                info!("ignoring deletion step because an error occured while archiving data");
                continue;
            }

            if let Err(err) = self.src.delete(&batch) {
                error!("an error occured while deleting data: {err}");
                log_error_chain(&err);
            }
        }
    }

    fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
        for dst in &mut self.dst {
            if let Err(err) = dst.write(batch) {
                error!(
                    "an error occured while archiving data to {}: {err}",
                    dst.name()
                );
                log_error_chain(&err);
                return Err(ArchiveError::ArchivingFailed);
            }
        }
        Ok(())
    }

    /// Release every owned resource exactly once, best effort.
    pub fn clean_exit(&mut self) {
        info!("please wait for clean exit...");
        if let Err(err) = self.src.clean_exit() {
            error!("source clean exit failed: {err}");
        }
        for dst in &mut self.dst {
            if let Err(err) = dst.clean_exit() {
                error!("destination {} clean exit failed: {err}", dst.name());
            }
        }
    }
}

pub fn log_error_chain(err: &ArchiveError) {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        error!("caused by: {cause}");
        source = cause.source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkiv_core::{Row, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Journal {
        deleted: Vec<i64>,
        written: Vec<i64>,
        source_closed: bool,
        destination_closed: bool,
    }

    struct FakeSource {
        batches: Vec<Batch>,
        archive_data: bool,
        delete_data: bool,
        journal: Rc<RefCell<Journal>>,
    }

    impl Source for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        fn archive_data(&self) -> bool {
            self.archive_data
        }

        fn delete_data(&self) -> bool {
            self.delete_data
        }

        fn next_batch(&mut self) -> Result<Option<Batch>, ArchiveError> {
            Ok(if self.batches.is_empty() {
                None
            } else {
                Some(self.batches.remove(0))
            })
        }

        fn delete(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
            let mut journal = self.journal.borrow_mut();
            for row in &batch.rows {
                if let Some(Value::Int(id)) = row.get("id") {
                    journal.deleted.push(*id);
                }
            }
            Ok(())
        }

        fn clean_exit(&mut self) -> Result<(), ArchiveError> {
            self.journal.borrow_mut().source_closed = true;
            Ok(())
        }
    }

    struct FakeDestination {
        fail_on: Option<i64>,
        journal: Rc<RefCell<Journal>>,
    }

    impl Destination for FakeDestination {
        fn name(&self) -> &str {
            "fake-dest"
        }

        fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
            for row in &batch.rows {
                if let Some(Value::Int(id)) = row.get("id") {
                    if self.fail_on == Some(*id) {
                        return Err(ArchiveError::FileWrite("disk full".to_string()));
                    }
                    self.journal.borrow_mut().written.push(*id);
                }
            }
            Ok(())
        }

        fn clean_exit(&mut self) -> Result<(), ArchiveError> {
            self.journal.borrow_mut().destination_closed = true;
            Ok(())
        }
    }

    fn batch_of(ids: &[i64]) -> Batch {
        Batch {
            database: "nova".to_string(),
            table: "instances".to_string(),
            rows: ids
                .iter()
                .map(|id| {
                    let mut row = Row::new();
                    row.insert("id".to_string(), Value::Int(*id));
                    row
                })
                .collect(),
        }
    }

    fn archiver(
        batches: Vec<Batch>,
        fail_on: Option<i64>,
        journal: Rc<RefCell<Journal>>,
    ) -> Archiver {
        Archiver::new(
            "test".to_string(),
            Box::new(FakeSource {
                batches,
                archive_data: true,
                delete_data: true,
                journal: journal.clone(),
            }),
            vec![Box::new(FakeDestination {
                fail_on,
                journal: journal.clone(),
            })],
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn batches_are_written_then_deleted() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut archiver = archiver(vec![batch_of(&[1, 2]), batch_of(&[3])], None, journal.clone());
        archiver.run().unwrap();

        let journal = journal.borrow();
        assert_eq!(journal.written, vec![1, 2, 3]);
        assert_eq!(journal.deleted, vec![1, 2, 3]);
        assert!(journal.source_closed);
        assert!(journal.destination_closed);
    }

    #[test]
    fn failed_write_skips_deletion_for_that_batch_only() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut archiver = archiver(
            vec![batch_of(&[1]), batch_of(&[2]), batch_of(&[3])],
            Some(2),
            journal.clone(),
        );
        archiver.run().unwrap();

        let journal = journal.borrow();
        assert_eq!(journal.written, vec![1, 3]);
        assert_eq!(journal.deleted, vec![1, 3]);
    }

    #[test]
    fn disabled_flags_do_nothing_but_still_succeed() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut archiver = Archiver::new(
            "idle".to_string(),
            Box::new(FakeSource {
                batches: vec![batch_of(&[1])],
                archive_data: false,
                delete_data: false,
                journal: journal.clone(),
            }),
            Vec::new(),
            Arc::new(AtomicBool::new(false)),
        );
        archiver.run().unwrap();

        let journal = journal.borrow();
        assert!(journal.written.is_empty());
        assert!(journal.deleted.is_empty());
        // nothing to do: resources were never touched
        assert!(!journal.source_closed);
    }

    #[test]
    fn interrupt_stops_before_the_next_batch_and_cleans_up() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let interrupted = Arc::new(AtomicBool::new(true));
        let mut archiver = Archiver::new(
            "stop".to_string(),
            Box::new(FakeSource {
                batches: vec![batch_of(&[1])],
                archive_data: true,
                delete_data: true,
                journal: journal.clone(),
            }),
            Vec::new(),
            interrupted,
        );
        assert!(matches!(archiver.run(), Err(ArchiveError::Interrupted)));

        let journal = journal.borrow();
        assert!(journal.deleted.is_empty());
        assert!(journal.source_closed);
    }
}
