//! Periodic publication of the current time on the timer topic.

use crate::runtime::Core;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use gapl_core::Timestamp;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{trace, warn};

pub(crate) struct Timer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Timer {
    pub(crate) fn spawn(core: Arc<Core>, topic: String, interval: Duration) -> std::io::Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("gapl-timer".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let now = Timestamp::now().to_string();
                        trace!(%now, "tick");
                        core.publish_packed(&topic, &now);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self { stop, handle })
    }

    pub(crate) fn stop(self) {
        // disconnecting wakes the thread
        drop(self.stop);
        if self.handle.join().is_err() {
            warn!("timer thread panicked");
        }
    }
}
