//! Fault injection for the in-memory stores.

/// An operation of an in-memory store that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Opening a native transaction.
    Begin,
    /// Committing a native transaction.
    Commit,
    /// Rolling back a native transaction.
    Rollback,
    /// Preparing a statement.
    Prepare,
    /// Executing a prepared statement.
    Execute,
    /// Directory search.
    Search,
    /// Directory entry insert.
    AddEntry,
    /// Directory entry removal.
    DeleteEntry,
    /// Adding attribute values.
    AddValues,
    /// Removing attribute values.
    DeleteValues,
    /// Replacing attribute values.
    ReplaceValues,
}

#[derive(Debug, Clone)]
struct Fault {
    point: FaultPoint,
    skip: u32,
    code: i32,
    message: String,
}

/// Pending faults, consumed in registration order per point.
#[derive(Debug, Default, Clone)]
pub(crate) struct FaultInjector {
    pending: Vec<Fault>,
}

impl FaultInjector {
    /// Registers a fault firing after `skip` successful calls at `point`.
    pub(crate) fn schedule(&mut self, point: FaultPoint, skip: u32, code: i32, message: String) {
        self.pending.push(Fault {
            point,
            skip,
            code,
            message,
        });
    }

    /// Checks whether the current call at `point` must fail.
    pub(crate) fn check(&mut self, point: FaultPoint) -> Option<(i32, String)> {
        let index = self.pending.iter().position(|f| f.point == point)?;
        let fault = &mut self.pending[index];
        if fault.skip > 0 {
            fault.skip -= 1;
            return None;
        }
        let fault = self.pending.remove(index);
        Some((fault.code, fault.message))
    }

    /// Drops every pending fault.
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once() {
        let mut faults = FaultInjector::default();
        faults.schedule(FaultPoint::Execute, 0, 1, "boom".into());

        assert_eq!(faults.check(FaultPoint::Begin), None);
        assert_eq!(faults.check(FaultPoint::Execute), Some((1, "boom".into())));
        assert_eq!(faults.check(FaultPoint::Execute), None);
    }

    #[test]
    fn skips_successful_calls() {
        let mut faults = FaultInjector::default();
        faults.schedule(FaultPoint::AddEntry, 2, 68, "exists".into());

        assert_eq!(faults.check(FaultPoint::AddEntry), None);
        assert_eq!(faults.check(FaultPoint::AddEntry), None);
        assert!(faults.check(FaultPoint::AddEntry).is_some());
    }

    #[test]
    fn clear_drops_pending() {
        let mut faults = FaultInjector::default();
        faults.schedule(FaultPoint::Search, 0, 1, "x".into());
        faults.clear();
        assert_eq!(faults.check(FaultPoint::Search), None);
    }
}
