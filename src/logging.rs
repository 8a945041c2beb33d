/// Logger setup: console plus `<model_dir>/train.log`
use env_logger::{Env, Target};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the log file inside the model directory
pub const LOG_FILE: &str = "train.log";

/// Writer duplicating everything into two sinks
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    /// Both sinks are always attempted; the first error is returned.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let first = self.first.write_all(buf);
        let second = self.second.write_all(buf);
        first.and(second)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let first = self.first.flush();
        let second = self.second.flush();
        first.and(second)
    }
}

/// Install the global logger
///
/// Records go to stderr and are appended to `<model_dir>/train.log`; the
/// directory is created if missing. Level defaults to `info` and can be
/// overridden through `RUST_LOG`. Returns the log file path.
pub fn init_logger<P: AsRef<Path>>(model_dir: P) -> crate::Result<PathBuf> {
    let dir = model_dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(LOG_FILE);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .target(Target::Pipe(Box::new(Tee::new(io::stderr(), file))))
        .try_init()?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_duplicates_output() -> io::Result<()> {
        let mut tee = Tee::new(Vec::new(), Vec::new());
        write!(tee, "Epoch {}/{}", 1, 500)?;
        tee.flush()?;

        let (first, second) = tee.into_inner();
        assert_eq!(first, b"Epoch 1/500");
        assert_eq!(first, second);
        Ok(())
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_tee_keeps_file_when_console_fails() {
        let mut tee = Tee::new(ClosedPipe, Vec::new());

        let err = tee.write_all(b"Epoch 2/500").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(tee.flush().is_err());

        let (_, file) = tee.into_inner();
        assert_eq!(file, b"Epoch 2/500");
    }

    #[test]
    fn test_init_logger_writes_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let model_dir = dir.path().join("logs");

        let path = init_logger(&model_dir)?;
        log::error!("logger smoke test marker");

        assert_eq!(path, model_dir.join(LOG_FILE));
        let contents = fs::read_to_string(&path)?;
        assert!(contents.contains("logger smoke test marker"));
        Ok(())
    }
}
