//! The command log, `.ninja_log`.
//!
//! A text file with a version header and then one tab-separated line per
//! finished command: start time, end time, output mtime, output path and a
//! hash of the command line.  Later lines for the same output supersede
//! earlier ones, so the file only ever grows until it is recompacted.

use crate::fs::FileSystem;
use crate::graph::{EdgeId, State, TimeStamp};
use crate::hash::hash_command;
use crate::trace;
use anyhow::anyhow;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const BUILD_LOG_FILENAME: &str = ".ninja_log";

const FILE_SIGNATURE: &str = "# ninja log v";
const OLDEST_SUPPORTED_VERSION: u32 = 4;
const CURRENT_VERSION: u32 = 5;

// Recompact once the file holds this many lines and at least
// COMPACTION_RATIO times as many lines as distinct outputs.
const MIN_COMPACTION_ENTRY_COUNT: usize = 100;
const COMPACTION_RATIO: usize = 3;

/// Outcome of loading a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// There was no file; start empty.
    NotFound,
    Loaded,
    /// The file was damaged or outdated and was repaired or discarded.
    /// The message is a warning for the user.
    Recovered(String),
}

/// Decides which outputs to drop when recompacting the log.
pub trait BuildLogUser {
    /// An output that no longer matters, e.g. because it left the graph.
    fn is_path_dead(&self, path: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub output: String,
    pub command_hash: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub mtime: TimeStamp,
}

impl LogEntry {
    fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{:x}",
            self.start_time, self.end_time, self.mtime, self.output, self.command_hash
        )
    }

    /// Parse one line of a log at `version`.  None for malformed lines.
    fn parse(line: &[u8], version: u32) -> Option<LogEntry> {
        let mut fields = line.splitn(5, |&c| c == b'\t');
        let start_time = fields.next()?;
        let end_time = fields.next()?;
        let mtime = fields.next()?;
        let output = fields.next()?;
        let rest = fields.next()?;
        let command_hash = if version >= 5 {
            u64::from_str_radix(&String::from_utf8_lossy(rest), 16).unwrap_or(0)
        } else {
            // Old logs stored the full command line.
            hash_command(&String::from_utf8_lossy(rest))
        };
        Some(LogEntry {
            output: String::from_utf8_lossy(output).into_owned(),
            command_hash,
            start_time: parse_int(start_time),
            end_time: parse_int(end_time),
            mtime: parse_int(mtime),
        })
    }
}

/// Lenient integer parsing: garbage reads as 0.
fn parse_int(field: &[u8]) -> i64 {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn open_for_append(path: &Path) -> std::io::Result<BufWriter<File>> {
    let f = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = f.metadata()?.len() == 0;
    let mut w = BufWriter::new(f);
    if empty {
        writeln!(w, "{}{}", FILE_SIGNATURE, CURRENT_VERSION)?;
        w.flush()?;
    }
    Ok(w)
}

#[derive(Default)]
pub struct BuildLog {
    entries: FxHashMap<String, LogEntry>,
    log_file: Option<BufWriter<File>>,
    log_file_path: Option<PathBuf>,
    needs_recompaction: bool,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    pub fn lookup_by_output(&self, path: &str) -> Option<&LogEntry> {
        self.entries.get(path)
    }

    pub fn needs_recompaction(&self) -> bool {
        self.needs_recompaction
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> anyhow::Result<LoadStatus> {
        let path = path.as_ref();
        trace::scope(".ninja_log load", || self.load_impl(path))
    }

    fn load_impl(&mut self, path: &Path) -> anyhow::Result<LoadStatus> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LoadStatus::NotFound),
            Err(err) => return Err(anyhow!("loading build log {}: {}", path.display(), err)),
        };
        if data.is_empty() {
            return Ok(LoadStatus::Loaded);
        }

        // A final line without a newline is an interrupted write; skip it.
        let mut lines = data.split(|&c| c == b'\n');
        let complete_lines = data.iter().filter(|&&c| c == b'\n').count();

        let version = lines
            .next()
            .and_then(|first| first.strip_prefix(FILE_SIGNATURE.as_bytes()))
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|v| v.trim_end_matches('\r').parse::<u32>().ok())
            .unwrap_or(0);
        if version < OLDEST_SUPPORTED_VERSION {
            // Ignore the error; the file gets rewritten either way.
            let _ = std::fs::remove_file(path);
            let msg = "build log version invalid, perhaps due to being too old; starting over";
            tracing::warn!("{}", msg);
            return Ok(LoadStatus::Recovered(msg.to_owned()));
        }

        let mut total_entry_count = 0;
        for line in lines.take(complete_lines.saturating_sub(1)) {
            let Some(entry) = LogEntry::parse(line, version) else {
                continue;
            };
            total_entry_count += 1;
            self.entries.insert(entry.output.clone(), entry);
        }

        let unique_entry_count = self.entries.len();
        // Also rewrite old-format logs in the current format.
        self.needs_recompaction = version < CURRENT_VERSION
            || (total_entry_count > MIN_COMPACTION_ENTRY_COUNT
                && total_entry_count > unique_entry_count * COMPACTION_RATIO);
        Ok(LoadStatus::Loaded)
    }

    /// Prepare to append to the log at `path`, recompacting it first if the
    /// load found it bloated.  The file itself is opened on first write.
    pub fn open_for_write(&mut self, path: impl AsRef<Path>, user: &dyn BuildLogUser) -> anyhow::Result<()> {
        let path = path.as_ref();
        if self.needs_recompaction {
            self.recompact(path, user)?;
        }
        self.log_file_path = Some(path.to_owned());
        Ok(())
    }

    fn open_for_write_if_needed(&mut self) -> anyhow::Result<()> {
        if self.log_file.is_some() {
            return Ok(());
        }
        let Some(path) = &self.log_file_path else {
            return Ok(());
        };
        let w = open_for_append(path).map_err(|err| anyhow!("opening build log: {}", err))?;
        self.log_file = Some(w);
        Ok(())
    }

    /// Record that `edge` finished.  Each output gets an entry carrying the
    /// hash of the full command and `mtime`, the output mtime as observed
    /// after the command ran.  Unchanged entries aren't rewritten.
    pub fn record_command(
        &mut self,
        state: &State,
        edge: EdgeId,
        start_time: i64,
        end_time: i64,
        mtime: TimeStamp,
    ) -> anyhow::Result<()> {
        let command_hash = hash_command(&state.evaluate_command(edge, true));
        for &out in state.edge(edge).outputs() {
            let entry = LogEntry {
                output: state.node(out).path().to_owned(),
                command_hash,
                start_time,
                end_time,
                mtime,
            };
            if self.entries.get(&entry.output) == Some(&entry) {
                continue;
            }
            self.open_for_write_if_needed()?;
            if let Some(w) = &mut self.log_file {
                entry
                    .write(w)
                    .and_then(|()| w.flush())
                    .map_err(|err| anyhow!("writing build log: {}", err))?;
            }
            self.entries.insert(entry.output.clone(), entry);
        }
        Ok(())
    }

    /// Flush and close the log file.  Creates the file if nothing was
    /// recorded, so the next load sees a current-version header.
    pub fn close(&mut self) -> anyhow::Result<()> {
        self.open_for_write_if_needed()?;
        if let Some(mut w) = self.log_file.take() {
            w.flush().map_err(|err| anyhow!("closing build log: {}", err))?;
        }
        Ok(())
    }

    fn write_all(&self, path: &Path, entries: &[&LogEntry]) -> std::io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "{}{}", FILE_SIGNATURE, CURRENT_VERSION)?;
        for entry in entries {
            entry.write(&mut w)?;
        }
        w.flush()
    }

    fn sorted_entries(&self) -> Vec<&LogEntry> {
        let mut entries: Vec<&LogEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.output.cmp(&b.output));
        entries
    }

    /// Rewrite the log with one line per live output, via a temporary file.
    pub fn recompact(&mut self, path: impl AsRef<Path>, user: &dyn BuildLogUser) -> anyhow::Result<()> {
        let path = path.as_ref();
        trace::scope(".ninja_log recompact", || {
            self.log_file = None;
            self.entries.retain(|output, _| !user.is_path_dead(output));

            let temp_path = temp_path(path, ".recompact");
            self.write_all(&temp_path, &self.sorted_entries())
                .map_err(|err| anyhow!("recompacting build log: {}", err))?;
            std::fs::rename(&temp_path, path)
                .map_err(|err| anyhow!("recompacting build log: {}", err))?;
            self.needs_recompaction = false;
            tracing::info!("recompacted {} to {} entries", path.display(), self.entries.len());
            Ok(())
        })
    }

    /// Refresh the recorded mtimes from disk, for all outputs or just
    /// `outputs` if non-empty, and rewrite the log at `path`.
    pub fn restat(&mut self, path: impl AsRef<Path>, fs: &dyn FileSystem, outputs: &[&str]) -> anyhow::Result<()> {
        let path = path.as_ref();
        trace::scope(".ninja_log restat", || {
            self.log_file = None;
            let selected: Vec<&str> = self
                .entries
                .keys()
                .map(|output| output.as_str())
                .filter(|output| outputs.is_empty() || outputs.contains(output))
                .collect();
            let selected_count = selected.len();
            let stats: Vec<(String, std::io::Result<crate::fs::MTime>)> = selected
                .par_iter()
                .map(|&output| (output.to_owned(), fs.stat(output)))
                .collect();
            for (output, mtime) in stats {
                let mtime = mtime.map_err(|err| anyhow!("stat({}): {}", output, err))?;
                if let Some(entry) = self.entries.get_mut(&output) {
                    entry.mtime = mtime.timestamp();
                }
            }

            let temp_path = temp_path(path, ".restat");
            self.write_all(&temp_path, &self.sorted_entries())
                .map_err(|err| anyhow!("restating build log: {}", err))?;
            std::fs::rename(&temp_path, path).map_err(|err| anyhow!("restating build log: {}", err))?;
            tracing::info!("restatted {} outputs in {}", selected_count, path.display());
            Ok(())
        })
    }
}

fn temp_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Rule;

    struct NoDeadPaths;
    impl BuildLogUser for NoDeadPaths {
        fn is_path_dead(&self, _path: &str) -> bool {
            false
        }
    }

    fn test_state() -> (State, EdgeId, EdgeId) {
        let mut state = State::new();
        state
            .add_rule(Rule::with_bindings("cat", &[("command", "cat $in > $out")]).unwrap())
            .unwrap();
        let e1 = state.build("cat").out("out").input("mid").finish().unwrap();
        let e2 = state.build("cat").out("mid").input("in").finish().unwrap();
        (state, e1, e2)
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        let (state, e1, e2) = test_state();

        let mut log = BuildLog::new();
        log.open_for_write(&path, &NoDeadPaths).unwrap();
        log.record_command(&state, e1, 15, 18, 0).unwrap();
        log.record_command(&state, e2, 20, 25, 0).unwrap();
        log.close().unwrap();

        let mut log2 = BuildLog::new();
        assert_eq!(log2.load(&path).unwrap(), LoadStatus::Loaded);
        assert_eq!(log2.entries().count(), 2);
        let e = log2.lookup_by_output("out").unwrap();
        assert_eq!(e, log.lookup_by_output("out").unwrap());
        assert_eq!((e.start_time, e.end_time), (15, 18));
        assert_eq!(e.command_hash, hash_command("cat mid > out"));
    }

    #[test]
    fn identical_records_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        let (state, e1, _) = test_state();

        let mut log = BuildLog::new();
        log.open_for_write(&path, &NoDeadPaths).unwrap();
        log.record_command(&state, e1, 1, 2, 3).unwrap();
        log.record_command(&state, e1, 1, 2, 3).unwrap();
        log.close().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn first_write_adds_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        let mut log = BuildLog::new();
        log.open_for_write(&path, &NoDeadPaths).unwrap();
        log.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# ninja log v5\n");
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = BuildLog::new();
        assert_eq!(log.load(dir.path().join("nope")).unwrap(), LoadStatus::NotFound);
    }

    #[test]
    fn old_version_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        std::fs::write(&path, "# ninja log v3\n123 456 0 out command\n").unwrap();
        let mut log = BuildLog::new();
        let status = log.load(&path).unwrap();
        assert!(matches!(status, LoadStatus::Recovered(ref msg) if msg.contains("version")));
        assert_eq!(log.entries().count(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn version_4_hashes_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        std::fs::write(&path, "# ninja log v4\n1\t2\t3\tout\tcat in > out\n").unwrap();
        let mut log = BuildLog::new();
        assert_eq!(log.load(&path).unwrap(), LoadStatus::Loaded);
        let e = log.lookup_by_output("out").unwrap();
        assert_eq!(e.command_hash, hash_command("cat in > out"));
        assert!(log.needs_recompaction());
    }

    #[test]
    fn truncated_final_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        std::fs::write(&path, "# ninja log v5\n1\t2\t3\tout\tabc\n4\t5\t6\tpart").unwrap();
        let mut log = BuildLog::new();
        log.load(&path).unwrap();
        assert_eq!(log.entries().count(), 1);
        assert_eq!(log.lookup_by_output("out").unwrap().command_hash, 0xabc);
        assert!(log.lookup_by_output("part").is_none());
    }

    #[test]
    fn later_lines_win_and_trigger_recompaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        let mut text = String::from("# ninja log v5\n");
        for i in 0..(MIN_COMPACTION_ENTRY_COUNT + 1) {
            text.push_str(&format!("{}\t{}\t0\tout\t{:x}\n", i, i + 1, i));
        }
        std::fs::write(&path, text).unwrap();
        let mut log = BuildLog::new();
        log.load(&path).unwrap();
        assert_eq!(log.entries().count(), 1);
        assert_eq!(log.lookup_by_output("out").unwrap().start_time, MIN_COMPACTION_ENTRY_COUNT as i64);
        assert!(log.needs_recompaction());
    }

    struct DeadPaths(&'static [&'static str]);
    impl BuildLogUser for DeadPaths {
        fn is_path_dead(&self, path: &str) -> bool {
            self.0.contains(&path)
        }
    }

    #[test]
    fn recompact_drops_dead_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        let (state, e1, e2) = test_state();

        let mut log = BuildLog::new();
        log.open_for_write(&path, &NoDeadPaths).unwrap();
        log.record_command(&state, e1, 1, 2, 3).unwrap();
        log.record_command(&state, e2, 1, 2, 3).unwrap();
        log.record_command(&state, e1, 4, 5, 6).unwrap();
        log.close().unwrap();

        log.recompact(&path, &DeadPaths(&["mid"])).unwrap();
        assert!(log.lookup_by_output("mid").is_none());

        let mut log2 = BuildLog::new();
        log2.load(&path).unwrap();
        assert_eq!(log2.entries().count(), 1);
        assert_eq!(log2.lookup_by_output("out").unwrap().start_time, 4);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn restat_updates_selected_mtimes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUILD_LOG_FILENAME);
        std::fs::write(&path, "# ninja log v5\n1\t2\t3\tout\tabc\n1\t2\t3\tmid\tdef\n").unwrap();

        let fs = crate::fs::VirtualFileSystem::new();
        fs.set_mtime("out", 77);
        fs.set_mtime("mid", 88);

        let mut log = BuildLog::new();
        log.load(&path).unwrap();
        log.restat(&path, &fs, &["out"]).unwrap();
        assert_eq!(log.lookup_by_output("out").unwrap().mtime, 77);
        assert_eq!(log.lookup_by_output("mid").unwrap().mtime, 3);

        let mut log2 = BuildLog::new();
        log2.load(&path).unwrap();
        assert_eq!(log2.lookup_by_output("out").unwrap().mtime, 77);

        log.restat(&path, &fs, &[]).unwrap();
        assert_eq!(log.lookup_by_output("mid").unwrap().mtime, 88);
    }
}
