//! File-backed transaction store
//!
//! One log file per global transaction id, one line per record:
//!
//! ```text
//! <log_dir>/
//!   sequence                                  transaction-number high-water mark
//!   6e6f64652d61-00000000000000000042.log      hex(coordinator id)-tx number
//! ```
//!
//! Each line is `<crc32 hex> <json record>`. A line whose checksum does not
//! match (a torn write at crash time) is skipped on read.

use crate::durability::DurabilityMode;
use crate::store::{LogRecord, LogStatus, StoreError, StoreResult, TransactionStore};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use twopc_core::{BranchId, GlobalId};

const SEQUENCE_FILE: &str = "sequence";
const SEQUENCE_TMP_FILE: &str = "sequence.tmp";
const LOG_EXTENSION: &str = "log";

/// Durable, file-per-transaction store.
pub struct FileStore {
    dir: PathBuf,
    mode: DurabilityMode,
    /// Last transaction number handed out
    sequence: Mutex<u64>,
    /// Appends share it, cleanup holds it exclusively. Each append is one
    /// `O_APPEND` write to its own transaction's file.
    io_lock: RwLock<()>,
}

impl FileStore {
    /// Open (or create) a store in `dir`.
    ///
    /// The high-water mark is the larger of the `sequence` file and the
    /// highest transaction number found among existing log files.
    pub fn open(dir: impl AsRef<Path>, mode: DurabilityMode) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let from_sequence = read_sequence(&dir.join(SEQUENCE_FILE))?;
        let from_logs = log_files(&dir)?
            .iter()
            .filter_map(|path| parse_tx_number(path))
            .max()
            .unwrap_or(0);
        let last = from_sequence.max(from_logs);

        debug!(dir = %dir.display(), last, mode = mode.description(), "Opened file store");

        Ok(Self {
            dir,
            mode,
            sequence: Mutex::new(last),
            io_lock: RwLock::new(()),
        })
    }

    /// Log directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Durability mode in effect.
    pub fn durability_mode(&self) -> DurabilityMode {
        self.mode
    }

    /// All readable records for `gid`, oldest first.
    pub fn read_log(&self, gid: &GlobalId) -> StoreResult<Vec<LogRecord>> {
        read_records(&self.log_path(gid))
    }

    /// Global ids (coordinator, tx number) whose log files are still present.
    pub fn retained(&self) -> StoreResult<Vec<(String, u64)>> {
        let mut retained = Vec::new();
        for path in log_files(&self.dir)? {
            if let Some(record) = read_records(&path)?.into_iter().next() {
                retained.push((record.coordinator_id, record.tx_number));
            }
        }
        retained.sort();
        Ok(retained)
    }

    fn log_path(&self, gid: &GlobalId) -> PathBuf {
        let coordinator: String = gid
            .coordinator_id()
            .bytes()
            .map(|b| format!("{:02x}", b))
            .collect();
        self.dir.join(format!(
            "{}-{:020}.{}",
            coordinator,
            gid.tx_number(),
            LOG_EXTENSION
        ))
    }

    fn append(&self, gid: &GlobalId, record: &LogRecord) -> StoreResult<()> {
        let line = encode_line(record)?;
        let path = self.log_path(gid);

        let _guard = self.io_lock.read();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        if self.mode.requires_sync(record.status) {
            file.sync_data()?;
            sync_dir(&self.dir)?;
        }
        Ok(())
    }
}

impl TransactionStore for FileStore {
    fn next_transaction_number(&self) -> StoreResult<u64> {
        let mut last = self.sequence.lock();
        let next = *last + 1;

        let tmp = self.dir.join(SEQUENCE_TMP_FILE);
        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{}", next)?;
            if self.mode.syncs_sequence() {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, self.dir.join(SEQUENCE_FILE))?;
        if self.mode.syncs_sequence() {
            sync_dir(&self.dir)?;
        }

        *last = next;
        Ok(next)
    }

    fn is_committing(&self, branch: &BranchId) -> StoreResult<bool> {
        let last_global = self
            .read_log(branch.global())?
            .into_iter()
            .rev()
            .find(LogRecord::is_global);
        Ok(last_global
            .map(|record| record.status.is_commit_decision())
            .unwrap_or(false))
    }

    fn record_global(
        &self,
        gid: &GlobalId,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()> {
        self.append(gid, &LogRecord::global(gid, status, cause))
    }

    fn record_branch(
        &self,
        branch: &BranchId,
        resource_manager: &str,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()> {
        self.append(
            branch.global(),
            &LogRecord::branch(branch, resource_manager, status, cause),
        )
    }

    fn cleanup(&self) -> StoreResult<()> {
        let _guard = self.io_lock.write();
        let mut removed = 0usize;

        for path in log_files(&self.dir)? {
            let records = match read_records(&path) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable log during cleanup");
                    continue;
                }
            };
            let collectable = records
                .iter()
                .rev()
                .find(|r| r.is_global())
                .map(|r| r.status.is_collectable())
                .unwrap_or(false);
            if collectable {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        debug!(removed, "File store cleanup complete");
        Ok(())
    }
}

fn encode_line(record: &LogRecord) -> StoreResult<String> {
    let json = serde_json::to_string(record)?;
    Ok(format!("{:08x} {}\n", crc32fast::hash(json.as_bytes()), json))
}

fn decode_line(line: &str) -> StoreResult<LogRecord> {
    let (crc, json) = line
        .split_once(' ')
        .ok_or_else(|| StoreError::Corrupt("missing checksum".to_string()))?;
    let expected = u32::from_str_radix(crc, 16)
        .map_err(|_| StoreError::Corrupt(format!("bad checksum field {:?}", crc)))?;
    let actual = crc32fast::hash(json.as_bytes());
    if expected != actual {
        return Err(StoreError::Corrupt(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }
    Ok(serde_json::from_str(json)?)
}

fn read_records(path: &Path) -> StoreResult<Vec<LogRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match decode_line(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = lineno + 1,
                error = %e,
                "Skipping corrupt log line"
            ),
        }
    }
    Ok(records)
}

fn read_sequence(path: &Path) -> StoreResult<u64> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .trim()
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("invalid sequence file {:?}", contents))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn log_files(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(LOG_EXTENSION) {
            files.push(path);
        }
    }
    Ok(files)
}

fn parse_tx_number(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (_, number) = stem.rsplit_once('-')?;
    number.parse().ok()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}
