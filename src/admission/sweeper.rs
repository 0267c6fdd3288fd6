use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use snafu::{OptionExt, ResultExt, ensure};
use tokio::{
    runtime::{Builder, Handle},
    sync::watch,
    time::{self, MissedTickBehavior},
};

use super::{
    ClientRegistry,
    error::{
        BuildRuntimeSnafu, IntervalTooLargeSnafu, SpawnThreadSnafu, SweeperError,
        ZeroDurationSnafu,
    },
    instant_now,
    internal_event::{
        ClientsSwept, ClientsSweptHandle, SweeperAbandoned, SweeperStarted, SweeperStopped, emit,
        register,
    },
};

/// Background loop evicting clients idle for longer than `expiration`, every `interval`.
///
/// The loop is spawned on the current Tokio runtime when there is one, otherwise on a dedicated
/// thread driving its own single-threaded runtime. [`stop`](ExpirySweeper::stop) only signals the
/// loop and returns immediately; a sweep already in progress finishes on its own. Dropping the
/// sweeper stops it too.
///
/// A loop spawned on the current runtime lives only as long as that runtime. If the runtime shuts
/// down first, the loop ends with a warning and [`is_running`](ExpirySweeper::is_running) turns
/// false.
#[derive(Debug)]
pub struct ExpirySweeper {
    stop_tx: watch::Sender<bool>,
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    spawned: AtomicBool,
    passes: AtomicU64,
}

// Clears `running` however the loop ends, including when its runtime shuts down.
struct RunningGuard {
    shared: Arc<Shared>,
    stopped: bool,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        // An unspawned loop belongs to a failed `start`, which reports its own error.
        if !self.stopped && self.shared.spawned.load(Ordering::Acquire) {
            emit(SweeperAbandoned {
                passes: self.shared.passes.load(Ordering::Relaxed),
            });
        }
    }
}

impl ExpirySweeper {
    pub fn start(
        registry: Arc<ClientRegistry>,
        interval: Duration,
        expiration: Duration,
    ) -> Result<Self, SweeperError> {
        ensure!(
            !interval.is_zero() && !expiration.is_zero(),
            ZeroDurationSnafu
        );
        let first_pass = time::Instant::now()
            .checked_add(interval)
            .context(IntervalTooLargeSnafu { interval })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared::default());
        shared.running.store(true, Ordering::Release);

        let sweep_loop = run(
            registry,
            Schedule {
                first_pass,
                interval,
                expiration,
            },
            stop_rx,
            register(ClientsSwept),
            RunningGuard {
                shared: Arc::clone(&shared),
                stopped: false,
            },
        );

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(sweep_loop);
            }
            Err(_) => {
                let runtime = Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .context(BuildRuntimeSnafu)?;
                thread::Builder::new()
                    .name("admission-sweeper".into())
                    .spawn(move || runtime.block_on(sweep_loop))
                    .context(SpawnThreadSnafu)?;
            }
        }

        shared.spawned.store(true, Ordering::Release);

        emit(SweeperStarted {
            interval,
            expiration,
        });
        Ok(Self { stop_tx, shared })
    }

    /// Signals the loop to exit. Never blocks, and calling it again is harmless.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            debug!(message = "Stopping idle client sweeper.");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of sweep passes completed so far.
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::Relaxed)
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Schedule {
    first_pass: time::Instant,
    interval: Duration,
    expiration: Duration,
}

async fn run(
    registry: Arc<ClientRegistry>,
    schedule: Schedule,
    mut stop_rx: watch::Receiver<bool>,
    swept: ClientsSweptHandle,
    mut guard: RunningGuard,
) {
    let shared = Arc::clone(&guard.shared);
    let mut ticker = time::interval_at(schedule.first_pass, schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            // Either a stop request or every handle dropped.
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                if *stop_rx.borrow() {
                    break;
                }
                let removed = registry.sweep(instant_now(), schedule.expiration);
                shared.passes.fetch_add(1, Ordering::Relaxed);
                swept.emit(removed, registry.count());
            }
        }
    }

    guard.stopped = true;
    emit(SweeperStopped {
        passes: shared.passes.load(Ordering::Relaxed),
    });
}
