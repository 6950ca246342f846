//! Diagnostic dumps for faults that end a server loop.
use std::{
    any::Any,
    backtrace::Backtrace,
    error::Error,
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

pub const DUMP_FILE: &str = "traceback.txt";

#[derive(Debug)]
pub struct Fault {
    summary: String,
    causes: Vec<String>,
    backtrace: Backtrace,
}

impl Fault {
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            summary: err.to_string(),
            causes,
            backtrace: Backtrace::force_capture(),
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        Self {
            summary: format!("panic: {message}"),
            causes: Vec::new(),
            backtrace: Backtrace::force_capture(),
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        for (depth, cause) in self.causes.iter().enumerate() {
            writeln!(f, "  caused by [{depth}]: {cause}")?;
        }
        writeln!(f)?;
        write!(f, "{}", self.backtrace)
    }
}

/// Writes `fault` to `<dir>/traceback.txt`, replacing any earlier dump.
pub fn persist(dir: &Path, fault: &Fault) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(DUMP_FILE);
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut file = fs::File::create(&path)?;
    writeln!(file, "fault at unix time {seconds}")?;
    write!(file, "{fault}")?;
    file.sync_all()?;
    Ok(path)
}
