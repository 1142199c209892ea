//! Interrupt handling
//!
//! A single coordination point replaces a process-wide handler that gets
//! swapped during shutdown: the first interrupt requests a stop, every later
//! one is logged and ignored, and once shutdown has begun nothing re-enters
//! it.

use crate::capture::traits::CaptureInterrupt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared shutdown state for one session
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    stop: CancellationToken,
    shutting_down: Arc<AtomicBool>,
    requests: Arc<AtomicU32>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when a stop is requested
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Request a stop. Returns true only for the request that took effect.
    pub fn request(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.shutting_down.load(Ordering::SeqCst) || self.stop.is_cancelled() {
            return false;
        }
        self.stop.cancel();
        true
    }

    pub fn is_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Number of stop requests received, including ignored ones
    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Mark shutdown as started. Returns false if it already had.
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Spawn the task that turns SIGINT/SIGTERM into stop requests
pub fn install(runtime: &Runtime, signal: ShutdownSignal) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            let name = tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!("Failed to listen for SIGINT: {}", e);
                        return;
                    }
                    "SIGINT"
                }
                _ = terminate() => "SIGTERM",
            };

            if signal.is_shutting_down() {
                tracing::warn!("Received {} while shutting down; ignoring", name);
            } else if signal.request() {
                tracing::info!("Received {}, stopping capture", name);
            } else {
                tracing::warn!("Received {} again; stop already requested", name);
            }
        }
    })
}

/// Spawn the task that forces a stalled camera to give up.
///
/// Once a stop is requested, capture has `grace` to return on its own
/// (`capture_done` cancelled). After that the camera is interrupted so the
/// blocked frame read fails and the shutdown sequence can run.
pub fn arm_escalation(
    runtime: &Runtime,
    signal: ShutdownSignal,
    capture_done: CancellationToken,
    grace: Duration,
    camera: Arc<dyn CaptureInterrupt>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        tokio::select! {
            _ = capture_done.cancelled() => return,
            _ = signal.stop_token().cancelled() => {}
        }
        tokio::select! {
            _ = capture_done.cancelled() => {}
            _ = tokio::time::sleep(grace) => {
                tracing::warn!("Capture still blocked {:?} after stop request; interrupting camera", grace);
                camera.interrupt();
            }
        }
    })
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to set up SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_first_request_takes_effect() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());

        assert!(signal.request());
        assert!(!signal.request());
        assert!(signal.is_requested());
        assert!(signal.stop_token().is_cancelled());
        assert_eq!(signal.request_count(), 2);
    }

    #[test]
    fn test_requests_ignored_after_shutdown_begins() {
        let signal = ShutdownSignal::new();
        assert!(signal.begin_shutdown());
        assert!(!signal.begin_shutdown());

        assert!(!signal.request());
        assert!(!signal.is_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = ShutdownSignal::new();
        let watcher = signal.clone();
        assert!(watcher.request());
        assert!(signal.stop_token().is_cancelled());
    }

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !condition() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[derive(Default)]
    struct CountingInterrupt(AtomicU32);

    impl CaptureInterrupt for CountingInterrupt {
        fn interrupt(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_repeated_sigint_stops_once() {
        let _signals = crate::capture::testing::SIGNAL_LOCK.lock();
        let runtime = runtime();
        let signal = ShutdownSignal::new();
        let handle = install(&runtime, signal.clone());
        // Let the watcher register its handlers
        std::thread::sleep(Duration::from_millis(100));

        unsafe { libc::raise(libc::SIGINT) };
        wait_for(|| signal.request_count() == 1);
        assert!(signal.is_requested());

        unsafe { libc::raise(libc::SIGINT) };
        wait_for(|| signal.request_count() == 2);
        assert_eq!(signal.request_count(), 2);
        assert!(signal.is_requested());
        assert!(!signal.is_shutting_down());
        assert!(!handle.is_finished());

        handle.abort();
        runtime.shutdown_background();
    }

    #[test]
    fn test_escalation_interrupts_stalled_capture() {
        let runtime = runtime();
        let signal = ShutdownSignal::new();
        let camera = Arc::new(CountingInterrupt::default());
        arm_escalation(
            &runtime,
            signal.clone(),
            CancellationToken::new(),
            Duration::from_millis(100),
            camera.clone(),
        );

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(camera.0.load(Ordering::SeqCst), 0);

        signal.request();
        wait_for(|| camera.0.load(Ordering::SeqCst) == 1);
        assert_eq!(camera.0.load(Ordering::SeqCst), 1);
        runtime.shutdown_background();
    }

    #[test]
    fn test_escalation_stands_down_when_capture_returns() {
        let runtime = runtime();
        let signal = ShutdownSignal::new();
        let capture_done = CancellationToken::new();
        let camera = Arc::new(CountingInterrupt::default());
        let handle = arm_escalation(
            &runtime,
            signal.clone(),
            capture_done.clone(),
            Duration::from_millis(100),
            camera.clone(),
        );

        signal.request();
        capture_done.cancel();
        wait_for(|| handle.is_finished());
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(camera.0.load(Ordering::SeqCst), 0);
        runtime.shutdown_background();
    }
}
