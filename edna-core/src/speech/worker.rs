//! Long-lived synthesis worker subprocess.
//!
//! The worker loads its neural model once and then services one request
//! per line of standard input. The protocol is line-delimited in both
//! directions:
//!
//! ```text
//! worker -> parent   READY                 (exactly once, after model load)
//! parent -> worker   <one line of text>
//! worker -> parent   /tmp/edna_tts_<pid>_<n>.wav   or   ERR <detail>
//! parent -> worker   __quit__              (shutdown request)
//! ```
//!
//! The worker's stderr is inherited so its warnings cannot corrupt the
//! stdout protocol. Responses are read through a dedicated reader thread
//! feeding a channel, which gives the parent timeouts on a blocking pipe.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::Synthesizer;
use crate::config::SpeechConfig;
use crate::error::{EdnaError, Result};

const READY_LINE: &str = "READY";
const QUIT_LINE: &str = "__quit__";
const ERR_PREFIX: &str = "ERR ";

/// Grace period between the quit request and a kill.
const QUIT_GRACE: Duration = Duration::from_millis(200);

struct WorkerChild {
    process: Child,
    stdin: ChildStdin,
    lines: Receiver<std::io::Result<String>>,
}

struct Slot {
    child: Option<WorkerChild>,
    /// Cleared on worker-fatal errors; never set again.
    enabled: bool,
}

/// Parent-side handle for the synthesis worker process.
///
/// The mutex covers start, stop, request writes and response reads, but
/// never playback, which happens after the lock is released so the other
/// stages are not blocked on the loudspeaker.
pub struct SynthWorker {
    config: SpeechConfig,
    slot: Mutex<Slot>,
}

impl SynthWorker {
    /// Lazy by default: the child is spawned (and the `READY` handshake
    /// performed) on the first synthesis request.
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot {
                child: None,
                enabled: true,
            }),
        }
    }

    fn spawn_child(config: &SpeechConfig) -> Result<WorkerChild> {
        info!(bin = %config.worker_bin.display(), "starting synthesis worker");

        let mut process = Command::new(&config.worker_bin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .env("EDNA_TTS_MODEL", &config.model_name)
            .env("EDNA_TTS_TMP", &config.tmp_dir)
            .env("EDNA_TTS_CUDA", if config.use_cuda { "1" } else { "0" })
            .spawn()
            .map_err(|e| EdnaError::Synthesis(format!("failed to spawn worker: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EdnaError::Synthesis("worker stdin unavailable".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EdnaError::Synthesis("worker stdout unavailable".into()))?;

        let (tx, lines) = mpsc::channel();
        thread::Builder::new()
            .name("edna-tts-reader".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| EdnaError::Synthesis(format!("reader thread spawn: {e}")))?;

        let mut child = WorkerChild {
            process,
            stdin,
            lines,
        };

        match child.lines.recv_timeout(config.handshake_timeout) {
            Ok(Ok(line)) if line.trim() == READY_LINE => {
                info!("synthesis worker ready");
                Ok(child)
            }
            Ok(Ok(line)) => {
                Self::stop_child(&mut child);
                Err(EdnaError::Synthesis(format!("bad hello: '{line}'")))
            }
            Ok(Err(e)) => {
                Self::stop_child(&mut child);
                Err(EdnaError::Synthesis(format!("handshake read: {e}")))
            }
            Err(_) => {
                Self::stop_child(&mut child);
                Err(EdnaError::Synthesis("handshake timeout".into()))
            }
        }
    }

    /// Polite quit, short grace, then kill and reap.
    fn stop_child(child: &mut WorkerChild) {
        let _ = writeln!(child.stdin, "{QUIT_LINE}");
        let _ = child.stdin.flush();

        thread::sleep(QUIT_GRACE);
        match child.process.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                let _ = child.process.kill();
            }
        }
        let _ = child.process.wait();
    }
}

impl Synthesizer for SynthWorker {
    fn synthesize(&mut self, text: &str) -> Result<PathBuf> {
        let mut slot = self.slot.lock();

        if !slot.enabled {
            return Err(EdnaError::Synthesis("synthesis disabled".into()));
        }

        if slot.child.is_none() {
            match Self::spawn_child(&self.config) {
                Ok(child) => slot.child = Some(child),
                Err(e) => {
                    slot.enabled = false;
                    return Err(e);
                }
            }
        }
        let child = match slot.child.as_mut() {
            Some(c) => c,
            None => return Err(EdnaError::Synthesis("worker unavailable".into())),
        };

        // The protocol is one request per line.
        let request = text.replace(['\r', '\n'], " ");
        if let Err(e) = writeln!(child.stdin, "{request}").and_then(|()| child.stdin.flush()) {
            warn!("worker pipe broken: {e}");
            if let Some(mut dead) = slot.child.take() {
                Self::stop_child(&mut dead);
            }
            slot.enabled = false;
            return Err(EdnaError::Synthesis(format!("request write: {e}")));
        }

        match child.lines.recv_timeout(self.config.request_timeout) {
            Ok(Ok(line)) => {
                let line = line.trim();
                if let Some(detail) = line.strip_prefix(ERR_PREFIX) {
                    // Per-request failure; the worker lives on.
                    Err(EdnaError::Synthesis(format!("worker: {detail}")))
                } else if line.is_empty() {
                    Err(EdnaError::Synthesis("empty response line".into()))
                } else {
                    Ok(PathBuf::from(line))
                }
            }
            Ok(Err(e)) => {
                if let Some(mut dead) = slot.child.take() {
                    Self::stop_child(&mut dead);
                }
                slot.enabled = false;
                Err(EdnaError::Synthesis(format!("response read: {e}")))
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(mut dead) = slot.child.take() {
                    Self::stop_child(&mut dead);
                }
                slot.enabled = false;
                Err(EdnaError::Synthesis("request timeout".into()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(mut dead) = slot.child.take() {
                    Self::stop_child(&mut dead);
                }
                slot.enabled = false;
                Err(EdnaError::Synthesis("worker exited".into()))
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.slot.lock().enabled
    }

    fn shutdown(&mut self) {
        let mut slot = self.slot.lock();
        if let Some(mut child) = slot.child.take() {
            info!("stopping synthesis worker");
            Self::stop_child(&mut child);
        }
    }
}

impl Drop for SynthWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn script_worker(body: &str) -> (SpeechConfig, PathBuf) {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "edna_worker_test_{}_{:?}.sh",
            std::process::id(),
            std::thread::current().id()
        ));
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let config = SpeechConfig {
            worker_bin: path.clone(),
            handshake_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
            ..SpeechConfig::default()
        };
        (config, path)
    }

    #[test]
    fn request_response_roundtrip() {
        let (config, path) = script_worker(
            r#"echo READY
while read line; do
  [ "$line" = "__quit__" ] && exit 0
  echo "/tmp/fake_out.wav"
done"#,
        );

        let mut worker = SynthWorker::new(config);
        let wav = worker.synthesize("hello there").unwrap();
        assert_eq!(wav, PathBuf::from("/tmp/fake_out.wav"));
        assert!(worker.is_enabled());

        worker.shutdown();
        let _ = fs::remove_file(path);
    }

    #[test]
    fn err_response_is_per_request_only() {
        let (config, path) = script_worker(
            r#"echo READY
while read line; do
  [ "$line" = "__quit__" ] && exit 0
  case "$line" in
    bad*) echo "ERR cannot speak that" ;;
    *) echo "/tmp/ok.wav" ;;
  esac
done"#,
        );

        let mut worker = SynthWorker::new(config);
        let err = worker.synthesize("bad input").unwrap_err();
        assert!(err.to_string().contains("cannot speak that"));
        assert!(worker.is_enabled(), "ERR must not kill the worker");

        assert!(worker.synthesize("good input").is_ok());
        worker.shutdown();
        let _ = fs::remove_file(path);
    }

    #[test]
    fn handshake_timeout_disables_synthesis() {
        let (config, path) = script_worker("sleep 10");
        let config = SpeechConfig {
            handshake_timeout: Duration::from_millis(200),
            ..config
        };

        let mut worker = SynthWorker::new(config);
        assert!(worker.synthesize("anything").is_err());
        assert!(!worker.is_enabled());

        // Stays disabled; no respawn attempts.
        assert!(worker.synthesize("again").is_err());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn worker_exit_mid_stream_disables_synthesis() {
        let (config, path) = script_worker(
            r#"echo READY
read line
exit 1"#,
        );

        let mut worker = SynthWorker::new(config);
        assert!(worker.synthesize("first").is_err());
        assert!(!worker.is_enabled());
        let _ = fs::remove_file(path);
    }
}
