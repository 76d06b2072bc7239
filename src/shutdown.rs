//! Graceful shutdown on Ctrl-C or SIGTERM.

use futures::{Stream, StreamExt as _, stream};
use tokio::sync::watch;

use crate::{async_utils::BoxedStream, prelude::*};

/// Exit status when a second signal cuts a shutdown short.
const FORCED_EXIT_CODE: i32 = 130;

/// A handle that reports when shutdown has been requested. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

/// The sending half of a [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

impl Shutdown {
    /// Create a shutdown handle and the trigger that fires it.
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (sender, receiver) = watch::channel(false);
        (ShutdownTrigger { sender }, Shutdown { receiver })
    }

    /// A handle that listens for Ctrl-C and, on Unix, SIGTERM. A second
    /// signal exits the process immediately.
    pub fn from_signals() -> Result<Shutdown> {
        let (trigger, shutdown) = Self::new();
        let signals = signal_stream()?;
        tokio::spawn(handle_signals(signals, trigger, || {
            std::process::exit(FORCED_EXIT_CODE)
        }));
        Ok(shutdown)
    }

    /// Has shutdown been requested?
    pub fn is_requested(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is requested. Never resolves if the trigger is
    /// dropped without firing.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Request shutdown on the first signal, and call `force_exit` on the second.
async fn handle_signals<S, F>(mut signals: S, trigger: ShutdownTrigger, force_exit: F)
where
    S: Stream<Item = ()> + Unpin,
    F: FnOnce(),
{
    if signals.next().await.is_none() {
        return;
    }
    warn!("Shutdown requested, finishing documents in progress (interrupt again to quit now)");
    trigger.trigger();
    if signals.next().await.is_some() {
        warn!("Interrupted again, quitting without finishing documents");
        force_exit();
    }
}

/// Was Ctrl-C pressed, or could we not listen for it?
fn ctrl_c_received(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!("Cannot listen for Ctrl-C: {}", err);
            false
        }
    }
}

/// Every Ctrl-C or SIGTERM we receive.
#[cfg(unix)]
fn signal_stream() -> Result<BoxedStream<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm = signal(SignalKind::terminate()).context("cannot listen for SIGTERM")?;
    Ok(stream::unfold(sigterm, |mut sigterm| async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                ctrl_c_received(result).then_some(((), sigterm))
            }
            received = sigterm.recv() => received.map(|()| ((), sigterm)),
        }
    })
    .boxed())
}

/// Every Ctrl-C we receive.
#[cfg(not(unix))]
fn signal_stream() -> Result<BoxedStream<()>> {
    Ok(stream::unfold((), |()| async {
        ctrl_c_received(tokio::signal::ctrl_c().await).then_some(((), ()))
    })
    .boxed())
}
