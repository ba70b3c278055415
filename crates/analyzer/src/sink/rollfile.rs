// Size-triggered rotation for the text sink: the active file is
// renamed with a monotonically increasing numeric suffix, rotated
// files are gzip-compressed, and old backups are pruned by count and
// age.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, error, info};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub struct RollingFileWriter {
    path: PathBuf,
    max_size_bytes: u64,
    max_backups: usize,
    max_age_days: u32,
    file: File,
    written: u64,
    next_index: u64,
}

impl RollingFileWriter {
    /// Open (or continue) the active file. `max_size_mb` of zero
    /// disables size rotation; `max_age_days` of zero disables age
    /// pruning.
    pub fn open(
        path: impl Into<PathBuf>,
        max_size_mb: u64,
        max_backups: usize,
        max_age_days: u32,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log directory `{}`", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log file `{}`", path.display()))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        let next_index = highest_backup_index(&path) + 1;
        Ok(Self {
            path,
            max_size_bytes: max_size_mb * 1024 * 1024,
            max_backups,
            max_age_days,
            file,
            written,
            next_index,
        })
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.max_size_bytes > 0
            && self.written > 0
            && self.written + buf.len() as u64 > self.max_size_bytes
        {
            self.rotate()?;
        }
        self.file
            .write_all(buf)
            .with_context(|| format!("write log file `{}`", self.path.display()))?;
        self.written += buf.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .with_context(|| format!("flush log file `{}`", self.path.display()))
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        let backup = backup_path(&self.path, self.next_index);
        fs::rename(&self.path, &backup).with_context(|| {
            format!("rotate `{}` to `{}`", self.path.display(), backup.display())
        })?;
        debug!(backup = %backup.display(), "rotated log file");
        self.next_index += 1;

        let path = self.path.clone();
        let max_backups = self.max_backups;
        let max_age_days = self.max_age_days;
        std::thread::spawn(move || {
            if let Err(err) = mill(&path, &backup, max_backups, max_age_days) {
                error!(%err, "log backup maintenance failed");
            }
        });

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("reopen log file `{}`", self.path.display()))?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(path: &Path, index: u64) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Compress the freshly rotated backup, then prune backups beyond the
/// count bound or older than the age bound. Runs off the sink worker.
pub fn mill(active: &Path, rotated: &Path, max_backups: usize, max_age_days: u32) -> Result<()> {
    compress(rotated)?;
    prune(active, max_backups, max_age_days)
}

fn compress(path: &Path) -> Result<()> {
    let mut gz_path = path.as_os_str().to_os_string();
    gz_path.push(".gz");
    let gz_path = PathBuf::from(gz_path);

    let mut input = File::open(path)
        .with_context(|| format!("open rotated file `{}`", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("create `{}`", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf).context("read rotated file")?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n]).context("write gzip backup")?;
    }
    encoder.finish().context("finish gzip backup")?;
    fs::remove_file(path)
        .with_context(|| format!("remove uncompressed `{}`", path.display()))?;
    info!(file = %gz_path.display(), "compressed rotated log file");
    Ok(())
}

fn prune(active: &Path, max_backups: usize, max_age_days: u32) -> Result<()> {
    let mut backups = list_backups(active)?;
    backups.sort_by_key(|(index, _)| *index);

    if max_backups > 0 && backups.len() > max_backups {
        let excess = backups.len() - max_backups;
        for (_, path) in backups.drain(..excess) {
            remove_backup(&path);
        }
    }

    if max_age_days > 0 {
        let cutoff = SystemTime::now() - Duration::from_secs(u64::from(max_age_days) * SECONDS_PER_DAY);
        for (_, path) in &backups {
            let too_old = fs::metadata(path)
                .and_then(|m| m.modified())
                .map(|mtime| mtime < cutoff)
                .unwrap_or(false);
            if too_old {
                remove_backup(path);
            }
        }
    }
    Ok(())
}

fn remove_backup(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(file = %path.display(), "removed old log backup"),
        Err(err) => error!(file = %path.display(), %err, "remove old log backup failed"),
    }
}

/// Backups of `<base>` look like `<base>.<n>` or `<base>.<n>.gz`.
fn list_backups(active: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let parent = active.parent().unwrap_or_else(|| Path::new("."));
    let Some(base) = active.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let mut found = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(index) = backup_index(base, name) {
            found.push((index, entry.path()));
        }
    }
    Ok(found)
}

fn backup_index(base: &str, name: &str) -> Option<u64> {
    let rest = name.strip_prefix(base)?.strip_prefix('.')?;
    let rest = rest.strip_suffix(".gz").unwrap_or(rest);
    rest.parse().ok()
}

fn highest_backup_index(active: &Path) -> u64 {
    list_backups(active)
        .map(|backups| backups.iter().map(|(i, _)| *i).max().unwrap_or(0))
        .unwrap_or(0)
}
