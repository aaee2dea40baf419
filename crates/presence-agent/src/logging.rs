use crate::config::{env_true, RuntimeConfig};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const LOG_FILE_NAME: &str = "presence-agent.log";

/// Keeps the log file handle alive for the life of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

/// Log sink fanning out to the log file and, when asked, stderr. Never
/// stdout: that stream carries the host protocol.
struct MultiWriter {
    stderr: Option<io::Stderr>,
    file: Option<Arc<Mutex<File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<File>>>, mirror_stderr: bool) -> Self {
        Self {
            stderr: mirror_stderr.then(io::stderr),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(stderr) = self.stderr.as_mut() {
            let _ = stderr.write_all(buf);
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(stderr) = self.stderr.as_mut() {
            let _ = stderr.flush();
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.flush();
        }
        Ok(())
    }
}

pub fn init_logging(config: &RuntimeConfig) -> Option<LogGuard> {
    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        match std::env::var("PRESENCE_LOG_LEVEL") {
            Ok(level) if !level.trim().is_empty() => EnvFilter::new(level),
            _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    };

    let guard = match open_log_file(&config.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    // With no file to write to, stderr is the only place logs can go.
    let mirror_stderr = env_true("PRESENCE_LOG_STDERR") || guard.file.is_none();
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), mirror_stderr));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn log_file_is_created_under_log_dir_and_appended() {
        let dir = tempdir().expect("temp dir");
        let guard = open_log_file(dir.path().to_str().expect("utf8 path")).expect("open log");
        let mut writer = MultiWriter::new(guard.file.clone(), false);
        writer.write_all(b"first\n").expect("write");
        writer.write_all(b"second\n").expect("write");
        writer.flush().expect("flush");

        let mut contents = String::new();
        File::open(dir.path().join(LOG_FILE_NAME))
            .expect("log file")
            .read_to_string(&mut contents)
            .expect("read log");
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn blank_log_dir_means_no_file() {
        let guard = open_log_file("   ").expect("no file");
        assert!(guard.file.is_none());
    }
}
