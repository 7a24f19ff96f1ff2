//! Running external tools with a deadline.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Run `cmd` to completion and return its stdout.
///
/// stdout is drained on a helper thread so a chatty child cannot block on a
/// full pipe. If the child has not closed stdout and exited within `timeout`
/// it is killed and reaped. A non-zero exit status is an error.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))?;

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        bail!("{program} has no stdout pipe");
    };

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let res = stdout.read_to_end(&mut buf).map(|_| buf);
        // The receiver is gone if we already timed out.
        let _ = tx.send(res);
    });

    let output = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(res) => res.with_context(|| format!("Failed to read output of {program}"))?,
        Err(_) => {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} timed out after {timeout:?}");
        }
    };

    let status = loop {
        let exited = child
            .try_wait()
            .with_context(|| format!("Failed to wait for {program}"))?;
        if let Some(status) = exited {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} timed out after {timeout:?}");
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    };
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(String::from_utf8_lossy(&output).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout() {
        let out = run_with_timeout(
            Command::new("sh").args(["-c", "echo first; echo second"]),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out, "first\nsecond\n");
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let res = run_with_timeout(
            Command::new("sh").args(["-c", "echo partial; exit 3"]),
            Duration::from_secs(5),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_missing_program_is_error() {
        let res = run_with_timeout(
            &mut Command::new("/nonexistent/layertrace-tool"),
            Duration::from_secs(5),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_slow_command_is_killed() {
        let start = Instant::now();
        let res = run_with_timeout(
            Command::new("sleep").arg("30"),
            Duration::from_millis(200),
        );
        let err = res.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_child_that_closes_stdout_then_hangs_is_killed() {
        let start = Instant::now();
        let res = run_with_timeout(
            Command::new("sh").args(["-c", "echo done; exec >&-; sleep 30"]),
            Duration::from_millis(300),
        );
        let err = res.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
