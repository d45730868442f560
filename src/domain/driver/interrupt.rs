use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the operator asked for by interrupting the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// Ctrl-C: remove every labelled unit, then exit.
    Cleanup,
    /// Ctrl-Z: exit right away and leave the units for inspection.
    Immediate,
}

#[cfg(target_os = "linux")]
const SIGTSTP: i32 = 20;
#[cfg(all(unix, not(target_os = "linux")))]
const SIGTSTP: i32 = 18;

/// Forwards process signals into `tx` until `shutdown` is cancelled or the receiving side is
/// gone.
#[cfg(unix)]
pub async fn listen(tx: mpsc::Sender<InterruptKind>, shutdown: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut suspend = signal(SignalKind::from_raw(SIGTSTP))?;
    loop {
        let kind = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            Some(()) = interrupt.recv() => InterruptKind::Cleanup,
            Some(()) = suspend.recv() => InterruptKind::Immediate,
            else => return Ok(()),
        };
        if tx.send(kind).await.is_err() {
            return Ok(());
        }
    }
}

/// Without job control only Ctrl-C can be caught.
#[cfg(not(unix))]
pub async fn listen(tx: mpsc::Sender<InterruptKind>, shutdown: CancellationToken) -> std::io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            signal = tokio::signal::ctrl_c() => signal?,
        }
        if tx.send(InterruptKind::Cleanup).await.is_err() {
            return Ok(());
        }
    }
}
