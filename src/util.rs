use std::io::{self, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
#[cfg(unix)]
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Keep the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect::<String>()
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// True if either stream went past the capture limit
    pub truncated: bool,
}

/// Read up to `limit` bytes, then drain the rest so the child never blocks on
/// a full pipe.
fn read_capped<R: Read>(reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let _ = (&mut reader).take(limit as u64).read_to_end(&mut buf);
    let overflow = io::copy(&mut reader, &mut io::sink()).unwrap_or(0);
    (buf, overflow > 0)
}

/// Process group of the command currently running, 0 when idle.
#[cfg(unix)]
static ACTIVE_GROUP: AtomicI32 = AtomicI32::new(0);

#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

/// Kill the child and everything it spawned.
///
/// Shell wrappers fork the real work (npm, then node), and those keep the
/// output pipes open after the shell itself is gone.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: plain syscall; the child leads its own group via `isolate`.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Kill the process group of the command in flight, if any.
///
/// Children run in their own group and so miss the terminal's Ctrl-C; the
/// interrupt handler calls this before exiting.
pub fn kill_active_command() {
    #[cfg(unix)]
    {
        let pgid = ACTIVE_GROUP.swap(0, Ordering::SeqCst);
        if pgid > 0 {
            // SAFETY: plain syscall on a group we created.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<CommandRunResult, String> {
    isolate(command);
    // A background process group must not read the terminal.
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start command: {}", e))?;
    #[cfg(unix)]
    let pgid = child.id() as i32;
    #[cfg(unix)]
    ACTIVE_GROUP.store(pgid, Ordering::SeqCst);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "Failed to capture stderr".to_string())?;

    let stdout_handle = thread::spawn(move || read_capped(stdout, max_output_bytes));
    let stderr_handle = thread::spawn(move || read_capped(stderr, max_output_bytes));

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    kill_tree(&mut child);
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                kill_tree(&mut child);
                #[cfg(unix)]
                let _ = ACTIVE_GROUP.compare_exchange(pgid, 0, Ordering::SeqCst, Ordering::SeqCst);
                return Err(format!("Failed to wait for command: {}", e));
            }
        }
    };
    #[cfg(unix)]
    let _ = ACTIVE_GROUP.compare_exchange(pgid, 0, Ordering::SeqCst, Ordering::SeqCst);

    let (stdout_bytes, stdout_truncated) = stdout_handle.join().unwrap_or_default();
    let (stderr_bytes, stderr_truncated) = stderr_handle.join().unwrap_or_default();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
    })
}
