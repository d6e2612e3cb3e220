//! Admission gate for mutating calls.
//!
//! Every mutating call holds a [`CallGuard`] from admission until it
//! returns, including while a purchase waits on an external transfer.
//! [`DrainGate::drain`] closes the gate and blocks until the last guard is
//! gone, so a snapshot taken afterwards sees no half-finished call.

use std::sync::{Condvar, Mutex};

use crate::ledger::error::{LedgerError, LedgerResult};

#[derive(Debug, Default)]
struct Admission {
    draining: bool,
    in_flight: usize,
}

#[derive(Debug, Default)]
pub struct DrainGate {
    admission: Mutex<Admission>,
    idle: Condvar,
}

/// Marks one admitted mutating call.
#[derive(Debug)]
pub struct CallGuard<'a> {
    gate: &'a DrainGate,
}

impl DrainGate {
    /// Admits a mutating call, or fails with `Draining` once draining started.
    pub fn enter(&self) -> LedgerResult<CallGuard<'_>> {
        let mut admission = self.admission.lock().unwrap_or_else(|e| e.into_inner());
        if admission.draining {
            return Err(LedgerError::Draining);
        }
        admission.in_flight += 1;
        Ok(CallGuard { gate: self })
    }

    /// Refuses new mutating calls and waits for the admitted ones to finish.
    pub fn drain(&self) {
        let mut admission = self.admission.lock().unwrap_or_else(|e| e.into_inner());
        admission.draining = true;
        if admission.in_flight > 0 {
            log::info!("draining: waiting for {} mutating calls", admission.in_flight);
        }
        while admission.in_flight > 0 {
            admission = self
                .idle
                .wait(admission)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Reopens the gate after a checkpoint.
    pub fn resume(&self) {
        self.admission
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .draining = false;
    }

    #[cfg(test)]
    pub fn is_draining(&self) -> bool {
        self.admission
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .draining
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let mut admission = self
            .gate
            .admission
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        admission.in_flight -= 1;
        if admission.in_flight == 0 {
            self.gate.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread, time::Duration};

    use super::*;

    #[test]
    fn draining_refuses_new_calls_until_resumed() {
        let gate = DrainGate::default();

        gate.drain();
        assert!(gate.is_draining());
        assert_eq!(gate.enter().unwrap_err(), LedgerError::Draining);

        gate.resume();
        assert!(gate.enter().is_ok());
    }

    #[test]
    fn drain_waits_for_admitted_calls() {
        let gate = DrainGate::default();
        let guard = gate.enter().unwrap();
        let (done_tx, done_rx) = mpsc::channel();

        thread::scope(|s| {
            s.spawn(|| {
                gate.drain();
                done_tx.send(()).unwrap();
            });

            assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(guard);
            assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
    }
}
