use crate::AppResult;

use aq_recorder_core::{StopReason, StopSignal};

use std::{future, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::{Builder, Runtime},
    signal,
};
use tracing::{debug, info, warn};

/// Watches for the events that end a recording and fires the session's
/// [`StopSignal`] on the first of them: Return on stdin, Ctrl-C, or the
/// configured maximum duration.
///
/// Runs on its own small tokio runtime so the session controller can block
/// the main thread.
pub(crate) struct StopTriggers {
    runtime: Runtime,
}

impl StopTriggers {
    /// Starts watching. `max_duration` of `None` records until stopped.
    pub(crate) fn spawn(stop: StopSignal, max_duration: Option<Duration>) -> AppResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("aq-stop-trigger")
            .enable_all()
            .build()?;

        runtime.spawn(async move {
            let reason = first_trigger(max_duration).await;
            if stop.trigger(reason) {
                info!(%reason, "Stop requested");
            }
        });

        Ok(Self { runtime })
    }

    /// Stops watching without waiting for the blocked stdin read.
    pub(crate) fn shutdown(self) {
        self.runtime.shutdown_background();
    }
}

async fn first_trigger(max_duration: Option<Duration>) -> StopReason {
    tokio::select! {
        () = return_pressed() => StopReason::UserRequest,
        () = interrupted() => StopReason::Interrupted,
        () = elapsed(max_duration) => StopReason::DurationElapsed,
    }
}

async fn return_pressed() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!("Stdin closed, Return will not stop the recording");
            future::pending::<()>().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to read stdin, Return will not stop the recording");
            future::pending::<()>().await;
        }
    }
}

async fn interrupted() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        future::pending::<()>().await;
    }
}

async fn elapsed(max_duration: Option<Duration>) {
    match max_duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => future::pending::<()>().await,
    }
}
