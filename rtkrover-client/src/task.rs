//! Dedicated-thread runner for the supervisor.
//!
//! The supervisor loop is synchronous (tick plus short sleeps), so it gets
//! its own named thread rather than a spot on the async runtime. `stop()`
//! asks the loop to exit, waits up to the grace period for a clean finish,
//! and detaches the thread if it refuses to die.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rtkrover_core::transport::{Clock, RtcmSink, Transport};
use rtkrover_core::{NtripClient, NtripHandle};

/// How long `stop()` waits for the loop to exit on its own.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

const JOIN_POLL: Duration = Duration::from_millis(100);

pub struct SupervisorTask {
    handle: NtripHandle,
    thread: Option<JoinHandle<()>>,
}

impl SupervisorTask {
    /// Move the client onto its own thread and start the loop.
    pub fn spawn<T, C, S>(mut client: NtripClient<T, C, S>) -> std::io::Result<Self>
    where
        T: Transport + Send + 'static,
        C: Clock + Send + 'static,
        S: RtcmSink + Send + 'static,
    {
        let handle = client.handle();
        let thread = std::thread::Builder::new()
            .name("ntrip-supervisor".to_string())
            .spawn(move || client.run())?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &NtripHandle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Request shutdown and wait out the grace period. Returns false when
    /// there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return false;
        };
        self.handle.request_shutdown();

        let deadline = Instant::now() + STOP_GRACE;
        while !thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(JOIN_POLL);
        }
        if thread.is_finished() {
            let _ = thread.join();
        } else {
            // A wedged loop cannot be killed from here; leave it detached
            // and let process exit reap it.
            log::warn!(
                "supervisor thread did not stop within {:?}, detaching",
                STOP_GRACE
            );
            drop(thread);
        }
        true
    }
}
