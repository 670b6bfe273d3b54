/// Optional node-visit instrumentation.
///
/// A `TraceObserver` is injected into the engine with
/// [`crate::BTreeFile::set_observer`] and removed with
/// [`crate::BTreeFile::clear_observer`]; while installed it is notified for
/// every node the run-start descent touches. There is no global trace state.
use crate::storage::page::PageId;

pub trait TraceObserver {
    fn node_visited(&mut self, page_id: PageId);
}

/// Writes one `VISIT node <id>` line per visit, for driving external
/// visualization tooling.
pub struct WriteObserver<W: std::io::Write> {
    out: W,
}

impl<W: std::io::Write> WriteObserver<W> {
    pub fn new(out: W) -> Self {
        WriteObserver { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: std::io::Write> TraceObserver for WriteObserver<W> {
    fn node_visited(&mut self, page_id: PageId) {
        // Instrumentation must not fail the operation it observes.
        let _ = writeln!(self.out, "VISIT node {}", page_id);
    }
}
