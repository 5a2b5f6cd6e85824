//! Background auto-flush for idle sessions.
//!
//! The worker thread wakes every `interval`, asks the session to send when no
//! send happened during the last interval, and sleeps again. A stop command
//! delivered over a channel ends the loop immediately; [`AutoFlush::stop`]
//! joins the thread so the caller knows no flush is in flight afterwards.
//! Failures are logged and forwarded on a bounded report channel. Reports
//! that cannot be delivered are counted and summarised at a limited rate.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, warn};

use crate::{error::S2sError, rate_limited_warner::RateLimitedWarner};

/// Result of one scheduler check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// A send happened recently; nothing to do.
    Idle,
    /// The session was flushed, sending this many staged bytes.
    Flushed(usize),
    /// The session is closed; the scheduler should exit.
    Stop,
}

/// Handle to a running auto-flush thread.
pub struct AutoFlush {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
    warner: Arc<RateLimitedWarner>,
}

impl AutoFlush {
    /// Spawn the worker thread.
    ///
    /// `tick` runs once immediately and then once per `interval` until the
    /// handle is stopped or `tick` reports [`Tick::Stop`].
    pub fn spawn<F>(
        interval: Duration,
        report_capacity: usize,
        warner: RateLimitedWarner,
        tick: F,
    ) -> io::Result<(Self, Receiver<S2sError>)>
    where
        F: FnMut() -> Result<Tick, S2sError> + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded(1);
        let (report_tx, report_rx) = bounded(report_capacity);
        let warner = Arc::new(warner);
        let worker_warner = Arc::clone(&warner);
        let handle = thread::Builder::new()
            .name("s2s-auto-flush".into())
            .spawn(move || worker_loop(stop_rx, report_tx, &worker_warner, interval, tick))?;
        Ok((
            Self {
                stop_tx,
                handle,
                warner,
            },
            report_rx,
        ))
    }

    /// Signal the worker to stop and wait for it to exit.
    pub fn stop(self) {
        let _ = self.stop_tx.try_send(());
        if self.handle.join().is_err() {
            warn!("s2s auto-flush thread panicked");
        }
        self.warner.flush(|count| {
            warn!("s2s auto-flush dropped {count} error reports");
        });
    }
}

fn worker_loop<F>(
    stop_rx: Receiver<()>,
    report_tx: Sender<S2sError>,
    warner: &RateLimitedWarner,
    interval: Duration,
    mut tick: F,
) where
    F: FnMut() -> Result<Tick, S2sError>,
{
    loop {
        match tick() {
            Ok(Tick::Stop) => break,
            Ok(Tick::Flushed(bytes)) => debug!("auto-flush sent {bytes} staged bytes"),
            Ok(Tick::Idle) => {}
            Err(err) => report(&report_tx, warner, err),
        }
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn report(report_tx: &Sender<S2sError>, warner: &RateLimitedWarner, err: S2sError) {
    warn!("s2s auto-flush failed: {err}");
    match report_tx.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
            warner.record_drop();
            warner.warn_if_due(|count| {
                warn!("s2s auto-flush dropped {count} error reports");
            });
        }
    }
}
