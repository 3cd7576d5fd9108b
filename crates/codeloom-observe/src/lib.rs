//! Session logging: an append-only file under the workspace runtime dir,
//! plus opt-in verbose echo to stderr.

use anyhow::Result;
use chrono::Utc;
use codeloom_core::config::runtime_dir;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Observer {
    log_path: PathBuf,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join("agent.log"),
            verbose: false,
        })
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Informational line: file always, stderr when verbose.
    pub fn info(&self, msg: &str) {
        if self.verbose {
            eprintln!("[codeloom] {msg}");
        }
        let _ = self.append("INFO", msg);
    }

    /// Warning line: file and stderr, always.
    pub fn warn(&self, msg: &str) {
        eprintln!("[codeloom WARN] {msg}");
        let _ = self.append("WARN", msg);
    }

    fn append(&self, level: &str, msg: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{} {level} {msg}", Utc::now().to_rfc3339())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended_to_the_log_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let observer = Observer::new(dir.path()).expect("observer");
        observer.info("first");
        observer.warn("second");
        let content =
            fs::read_to_string(runtime_dir(dir.path()).join("agent.log")).expect("log file");
        assert!(content.contains("INFO first"));
        assert!(content.contains("WARN second"));
    }

    #[test]
    fn verbose_flag_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut observer = Observer::new(dir.path()).expect("observer");
        assert!(!observer.is_verbose());
        observer.set_verbose(true);
        assert!(observer.is_verbose());
    }
}
