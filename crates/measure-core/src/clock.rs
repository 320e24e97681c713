//! Source of "today" for services.

use chrono::Local;
use std::fmt::Debug;

use crate::calendar::NumberedDate;
use crate::error::Result;

/// Provides the current local date.
pub trait Clock: Send + Sync + Debug {
    /// Today's date in the service's environment.
    fn today(&self) -> Result<NumberedDate>;
}

/// Reads the date from the system clock in local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Result<NumberedDate> {
        NumberedDate::from_naive(Local::now().date_naive())
    }
}

/// Always reports the same date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NumberedDate);

impl Clock for FixedClock {
    fn today(&self) -> Result<NumberedDate> {
        Ok(self.0)
    }
}
