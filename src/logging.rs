use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

use crate::platform::{NativePlatform, Platform};

/// Log lines go to a file because the monitor screen owns the terminal.
#[derive(Clone)]
pub(crate) struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

impl FileMakeWriter {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
            NativePlatform::restrict_dir_permissions(dir);
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        NativePlatform::restrict_file_permissions(path);
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            file: self.file.clone(),
        }
    }
}

pub(crate) struct FileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.file.lock() {
            Ok(mut file) => file.write_all(buf)?,
            // A poisoned lock only drops this line.
            Err(_) => return Ok(buf.len()),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.file.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

pub(crate) fn log_path() -> PathBuf {
    NativePlatform::data_dir().join("logs").join("flowwatch.log")
}

/// Installs the global subscriber. Returns the log file path when file
/// logging could be set up.
pub(crate) fn init_logging(level: Level) -> Option<PathBuf> {
    let path = log_path();
    let writer = match FileMakeWriter::open(&path) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("Could not open log file {}: {}", path.display(), e);
            return None;
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn writers_append_to_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("flowwatch.log");
        let make = FileMakeWriter::open(&path).unwrap();

        make.make_writer().write_all(b"first\n").unwrap();
        let mut second = make.make_writer();
        second.write_all(b"second\n").unwrap();
        second.flush().unwrap();

        let reopened = FileMakeWriter::open(&path).unwrap();
        reopened.make_writer().write_all(b"third\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\nthird\n");
    }
}
