use crate::error::BatchError;

/// Outcome of one [`Tasklet::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet has more work and wants to be called again.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// A single-shot unit of work run around the record pipeline, such as
/// backing up a consumed file or removing stale entities.
pub trait Tasklet {
    fn execute(&self) -> Result<RepeatStatus, BatchError>;

    /// Calls [`Tasklet::execute`] until the tasklet reports
    /// [`RepeatStatus::Finished`].
    fn run(&self) -> Result<(), BatchError> {
        while self.execute()? == RepeatStatus::Continuable {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::{RepeatStatus, Tasklet};
    use crate::error::BatchError;

    struct Countdown {
        remaining: Cell<usize>,
    }

    impl Tasklet for Countdown {
        fn execute(&self) -> Result<RepeatStatus, BatchError> {
            self.remaining.set(self.remaining.get() - 1);
            if self.remaining.get() == 0 {
                Ok(RepeatStatus::Finished)
            } else {
                Ok(RepeatStatus::Continuable)
            }
        }
    }

    #[test]
    fn run_repeats_until_finished() {
        let countdown = Countdown {
            remaining: Cell::new(3),
        };
        countdown.run().unwrap();
        assert_eq!(countdown.remaining.get(), 0);
    }
}
