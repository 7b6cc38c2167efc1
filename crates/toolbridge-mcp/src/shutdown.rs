//! Child process termination with SIGTERM → SIGKILL escalation.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Stop a child process and reap it.
///
/// # Strategy
/// 1. Wait up to `grace` for the child to exit on its own (its stdin is
///    expected to be closed already)
/// 2. Send SIGTERM and wait up to `grace` again
/// 3. Send SIGKILL and reap
///
/// On Windows there is no SIGTERM; the child is killed after step 1.
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Ok(status) = timeout(grace, child.wait()).await {
        return status;
    }

    #[cfg(unix)]
    {
        terminate_unix(child, grace).await
    }

    #[cfg(not(unix))]
    {
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn terminate_unix(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    // No PID means the child was already reaped.
    let Some(pid) = child.id() else {
        return child.wait().await;
    };
    let pid = i32::try_from(pid).map_err(io::Error::other)?;

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(status) = timeout(grace, child.wait()).await {
        return status;
    }

    tracing::debug!(pid, "Child ignored SIGTERM, sending SIGKILL");
    child.kill().await?;
    child.wait().await
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::process::Command;

    use super::*;

    #[tokio::test]
    async fn test_sigterm_stops_sleeping_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn sleep");

        let started = std::time::Instant::now();
        let status = shutdown_child(&mut child, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_exited_child() {
        let mut child = Command::new("true").spawn().expect("failed to spawn true");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = shutdown_child(&mut child, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(status.success());
    }
}
