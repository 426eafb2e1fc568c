//! Append-only CSV persistence for received datagrams.
//!
//! The file written here is the source the ingestion tailer follows.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::model::Datagram;
use crate::model::datagram::CSV_HEADER;

pub struct DatagramRepository {
    path: PathBuf,
    // Held for the whole append so rows from concurrent callers never interleave.
    write_lock: Mutex<()>,
    total_saved: AtomicU64,
}

impl DatagramRepository {
    /// Opens the repository, creating parent directories and a header row if
    /// the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        if !path.exists() {
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .from_path(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            writer.write_record(CSV_HEADER)?;
            writer.flush()?;
            info!(path = %path.display(), "Created datagram file");
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            total_saved: AtomicU64::new(0),
        })
    }

    pub fn save(&self, datagram: &Datagram) -> Result<()> {
        self.save_all(std::slice::from_ref(datagram))
    }

    /// Appends all rows under one lock acquisition.
    pub fn save_all(&self, datagrams: &[Datagram]) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        for datagram in datagrams {
            writer.write_record(datagram.to_csv_record())?;
        }
        writer.flush()?;

        self.total_saved
            .fetch_add(datagrams.len() as u64, Ordering::Relaxed);
        debug!(rows = datagrams.len(), "Datagrams appended");
        Ok(())
    }

    /// Rows saved through this instance.
    pub fn total_saved(&self) -> u64 {
        self.total_saved.load(Ordering::Relaxed)
    }

    /// Data rows currently in the file, header excluded.
    pub fn count_in_file(&self) -> Result<u64> {
        let file = File::open(&self.path)?;
        let lines = BufReader::new(file).lines().count() as u64;
        Ok(lines.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::datagram::is_header_line;
    use std::env;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join("fleet_speeds_tests").join(name)
    }

    fn sample(bus: i64) -> Datagram {
        Datagram::from_csv_line(&format!(
            "E,2024-01-01 12:00:00,100,0,3.4,-76.5,1,241,5,,2024-01-01 12:00:00,{bus}"
        ))
        .unwrap()
    }

    #[test]
    fn test_open_creates_file_with_header() {
        let path = temp_path("repo_header.csv");
        let _ = fs::remove_file(&path);

        let repo = DatagramRepository::open(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(is_header_line(content.lines().next().unwrap()));
        assert_eq!(repo.count_in_file().unwrap(), 0);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rows_round_trip_through_file() {
        let path = temp_path("repo_rows.csv");
        let _ = fs::remove_file(&path);

        let repo = DatagramRepository::open(&path).unwrap();
        repo.save(&sample(1)).unwrap();
        repo.save_all(&[sample(2), sample(3)]).unwrap();
        assert_eq!(repo.total_saved(), 3);

        // reopening must not add a second header
        let repo = DatagramRepository::open(&path).unwrap();
        assert_eq!(repo.count_in_file().unwrap(), 3);

        let content = fs::read_to_string(&path).unwrap();
        let rows: Vec<Datagram> = content
            .lines()
            .skip(1)
            .map(|l| Datagram::from_csv_line(l).unwrap())
            .collect();
        assert_eq!(rows[2].bus_id, 3);
        assert_eq!(rows[0], sample(1));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_concurrent_saves_do_not_interleave() {
        let path = temp_path("repo_concurrent.csv");
        let _ = fs::remove_file(&path);
        let repo = std::sync::Arc::new(DatagramRepository::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        repo.save(&sample(t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let parsed = content
            .lines()
            .skip(1)
            .filter(|l| Datagram::from_csv_line(l).is_ok())
            .count();
        assert_eq!(parsed, 200);

        fs::remove_file(&path).unwrap();
    }
}
