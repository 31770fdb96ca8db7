//! Subprocess plumbing for benchmark commands.

use tokio::io::{AsyncRead, AsyncReadExt};

/// RAII guard that kills a benchmark child (and its process group on Unix)
/// when dropped.
///
/// Wrap the child right after `spawn()`. If the owning future is dropped by a
/// timeout or shutdown, the whole `go test` tree goes with it. Call
/// `disarm()` once the child has exited on its own.
pub struct ChildGuard {
    child: Option<tokio::process::Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: tokio::process::Child) -> Self {
        Self { child: Some(child) }
    }

    /// `None` once disarmed.
    pub fn child_mut(&mut self) -> Option<&mut tokio::process::Child> {
        self.child.as_mut()
    }

    pub fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                unsafe {
                    if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
                        let _ = child.start_kill();
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
        let _ = child.try_wait();
    }
}

/// Put the child in its own session (Unix only) so `ChildGuard` can kill the
/// entire process group, including compiled test binaries spawned by the
/// runner.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the benchmark dies with benchwatch.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut tokio::process::Command) {}

/// Drain a pipe to EOF, keeping at most `max_collect` bytes.
///
/// The rest is read and thrown away so the child never blocks on a full pipe.
/// Returns the kept text and whether anything was dropped.
pub async fn read_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    max_collect: usize,
) -> (String, bool) {
    let mut buf = [0u8; 4096];
    let mut collected: Vec<u8> = Vec::new();
    let mut truncated = false;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_collect.saturating_sub(collected.len());
        let take = remaining.min(n);
        collected.extend_from_slice(&buf[..take]);
        if take < n {
            truncated = true;
        }
    }

    let mut text = String::from_utf8_lossy(&collected).into_owned();
    // A cut in the middle of a multi-byte sequence shows up as a trailing
    // replacement character.
    if truncated && text.ends_with('\u{FFFD}') {
        text.pop();
    }
    (text, truncated)
}
