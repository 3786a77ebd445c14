//! Worker status bitmask

use std::fmt;

/// Worker lifecycle status
///
/// One lifecycle state bit plus a sticky error bit. The lifecycle only moves
/// forward: Created, Connecting, Running, Ending, Ended.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerStatus(u8);

impl WorkerStatus {
    /// Built but not started
    pub const CREATED: WorkerStatus = WorkerStatus(1);
    /// Running unit setup
    pub const CONNECTING: WorkerStatus = WorkerStatus(2);
    /// In the pacing loop
    pub const RUNNING: WorkerStatus = WorkerStatus(4);
    /// A fault was raised (combines with later states)
    pub const ERROR: WorkerStatus = WorkerStatus(8);
    /// Left the pacing loop, tearing down
    pub const ENDING: WorkerStatus = WorkerStatus(16);
    /// Finished
    pub const ENDED: WorkerStatus = WorkerStatus(32);

    const STATE_MASK: u8 = !Self::ERROR.0;

    /// Raw bits
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set
    pub fn contains(self, other: WorkerStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// Lifecycle state without the error bit
    pub fn state(self) -> WorkerStatus {
        WorkerStatus(self.0 & Self::STATE_MASK)
    }

    /// True if the error bit is set
    pub fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }

    /// True once the lifecycle reached `state` or anything after it
    pub fn reached(self, state: WorkerStatus) -> bool {
        self.state().0 >= state.state().0
    }

    /// Ending or Ended
    pub fn is_terminal(self) -> bool {
        self.reached(Self::ENDING)
    }

    /// Ended
    pub fn is_ended(self) -> bool {
        self.reached(Self::ENDED)
    }

    /// Move the lifecycle forward to `next`; earlier states are ignored
    pub fn advance(self, next: WorkerStatus) -> WorkerStatus {
        let next = next.state();
        if next.0 > self.state().0 {
            WorkerStatus(next.0 | (self.0 & Self::ERROR.0))
        } else {
            self
        }
    }

    /// Set the sticky error bit
    pub fn with_error(self) -> WorkerStatus {
        WorkerStatus(self.0 | Self::ERROR.0)
    }

    fn state_name(self) -> &'static str {
        match self.state() {
            Self::CREATED => "Created",
            Self::CONNECTING => "Connecting",
            Self::RUNNING => "Running",
            Self::ENDING => "Ending",
            Self::ENDED => "Ended",
            _ => "Unknown",
        }
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::CREATED
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "{}|Error", self.state_name())
        } else {
            f.write_str(self.state_name())
        }
    }
}

impl fmt::Debug for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerStatus({self}, {:#04x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_is_monotonic() {
        let status = WorkerStatus::default()
            .advance(WorkerStatus::CONNECTING)
            .advance(WorkerStatus::RUNNING);
        assert_eq!(status, WorkerStatus::RUNNING);

        // going back is ignored
        assert_eq!(status.advance(WorkerStatus::CONNECTING), WorkerStatus::RUNNING);
        assert_eq!(status.advance(WorkerStatus::ENDED), WorkerStatus::ENDED);
    }

    #[test]
    fn test_error_is_sticky() {
        let status = WorkerStatus::RUNNING.with_error();
        assert!(status.is_error());
        assert_eq!(status.state(), WorkerStatus::RUNNING);

        let ended = status.advance(WorkerStatus::ENDING).advance(WorkerStatus::ENDED);
        assert!(ended.is_error());
        assert!(ended.is_ended());
        assert_eq!(ended.bits(), 32 | 8);
        assert_eq!(ended.to_string(), "Ended|Error");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WorkerStatus::RUNNING.is_terminal());
        assert!(WorkerStatus::ENDING.is_terminal());
        assert!(WorkerStatus::ENDED.is_terminal());
        assert!(WorkerStatus::ENDING.reached(WorkerStatus::RUNNING));
        assert!(!WorkerStatus::CONNECTING.reached(WorkerStatus::RUNNING));
    }
}
