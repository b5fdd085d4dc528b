//! Writer slot: admits one write transaction at a time.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::WriteWait;
use crate::error::{CellarError, Result};

pub(crate) struct WriterSlot {
    busy: Mutex<bool>,
    released: Condvar,
}

impl WriterSlot {
    pub fn new() -> Self {
        Self {
            busy: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    /// Take the slot, waiting according to `wait`
    ///
    /// Not reentrant: a thread that already holds the slot and asks again
    /// under `WriteWait::Block` waits forever.
    pub fn acquire(&self, wait: WriteWait) -> Result<()> {
        let mut busy = self.busy.lock();

        match wait.timeout() {
            None => {
                while *busy {
                    self.released.wait(&mut busy);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while *busy {
                    if self.released.wait_until(&mut busy, deadline).timed_out() && *busy {
                        return Err(CellarError::WriterBusy);
                    }
                }
            }
        }

        *busy = true;
        Ok(())
    }

    pub fn release(&self) {
        let mut busy = self.busy.lock();
        *busy = false;
        drop(busy);
        self.released.notify_one();
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        *self.busy.lock()
    }
}
