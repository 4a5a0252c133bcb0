//! The dependency log, `.ninja_deps`: discovered implicit dependencies for
//! outputs of rules with a `deps` binding.
//!
//! A binary file: a signature and version, then a sequence of records each
//! starting with a little-endian u32 whose high bit says whether it is a deps
//! record and whose low bits give the payload size.
//!
//! - A path record is the path, NUL-padded to a multiple of 4, followed by
//!   the one's complement of the id it is assigned.  Ids are dense and
//!   assigned in file order, so the checksum catches misordered data.
//! - A deps record is the output's id, its mtime as two u32 halves, and then
//!   the ids of each dependency.

use crate::build_log::LoadStatus;
use crate::graph::{NodeId, State, TimeStamp};
use crate::trace;
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const DEPS_LOG_FILENAME: &str = ".ninja_deps";

const FILE_SIGNATURE: &[u8] = b"# ninjadeps\n";
const CURRENT_VERSION: u32 = 4;
const HEADER_SIZE: usize = FILE_SIGNATURE.len() + 4;

/// Records are read into a buffer of this size, so it bounds paths and deps lists.
const MAX_RECORD_SIZE: usize = (1 << 19) - 1;
const DEPS_RECORD_BIT: u32 = 1 << 31;

// Recompact once the file holds this many deps records and at least
// COMPACTION_RATIO times as many as distinct outputs.
const MIN_COMPACTION_ENTRY_COUNT: usize = 1000;
const COMPACTION_RATIO: usize = 3;

/// The recorded dependencies of one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deps {
    /// The output's mtime when the dependencies were recorded.
    pub mtime: TimeStamp,
    pub nodes: Vec<NodeId>,
}

/// Appends encoded records to an open log file.  Each record is flushed
/// in one write.
struct RecordWriter {
    w: BufWriter<File>,
}

impl RecordWriter {
    fn open(path: &Path) -> std::io::Result<Self> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        let empty = f.metadata()?.len() == 0;
        let mut w = RecordWriter {
            w: BufWriter::with_capacity(MAX_RECORD_SIZE + 4, f),
        };
        if empty {
            w.w.write_all(FILE_SIGNATURE)?;
            w.w.write_all(&CURRENT_VERSION.to_le_bytes())?;
            w.w.flush()?;
        }
        Ok(w)
    }

    fn write_path(&mut self, path: &str, id: u32) -> anyhow::Result<()> {
        let padding = (4 - path.len() % 4) % 4;
        let size = path.len() + padding + 4;
        if size > MAX_RECORD_SIZE {
            bail!("path too long for deps log: {}", path);
        }
        let w = &mut self.w;
        w.write_all(&(size as u32).to_le_bytes())?;
        w.write_all(path.as_bytes())?;
        w.write_all(&[0u8; 3][..padding])?;
        w.write_all(&(!id).to_le_bytes())?;
        w.flush()?;
        Ok(())
    }

    fn write_deps(&mut self, out: u32, mtime: TimeStamp, deps: &[u32]) -> anyhow::Result<()> {
        let size = 4 * (1 + 2 + deps.len());
        if size > MAX_RECORD_SIZE {
            bail!("too many dependencies to record ({})", deps.len());
        }
        let w = &mut self.w;
        w.write_all(&(size as u32 | DEPS_RECORD_BIT).to_le_bytes())?;
        w.write_all(&out.to_le_bytes())?;
        w.write_all(&(mtime as u64 as u32).to_le_bytes())?;
        w.write_all(&((mtime as u64 >> 32) as u32).to_le_bytes())?;
        for dep in deps {
            w.write_all(&dep.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }
}

fn read_u32(buf: &[u8], ofs: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[ofs..ofs + 4]);
    u32::from_le_bytes(word)
}

#[derive(Default)]
pub struct DepsLog {
    needs_recompaction: bool,
    file: Option<RecordWriter>,
    file_path: Option<PathBuf>,
    /// Maps id to node.
    nodes: Vec<NodeId>,
    /// Maps id to the deps recorded for that node, if any.
    deps: Vec<Option<Deps>>,
}

impl DepsLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes with an id, in id order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn needs_recompaction(&self) -> bool {
        self.needs_recompaction
    }

    pub fn load(&mut self, path: impl AsRef<Path>, state: &mut State) -> anyhow::Result<LoadStatus> {
        let path = path.as_ref();
        trace::scope(".ninja_deps load", || self.load_impl(path, state))
    }

    fn load_impl(&mut self, path: &Path, state: &mut State) -> anyhow::Result<LoadStatus> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LoadStatus::NotFound),
            Err(err) => return Err(anyhow!("loading deps log {}: {}", path.display(), err)),
        };

        let version = if data.len() >= HEADER_SIZE && data.starts_with(FILE_SIGNATURE) {
            read_u32(&data, FILE_SIGNATURE.len())
        } else {
            0
        };
        if version != CURRENT_VERSION {
            let msg = if version == 1 {
                "deps log version change; rebuilding"
            } else {
                "bad deps log signature or version; starting over"
            };
            // Ignore the error; the file gets rewritten either way.
            let _ = std::fs::remove_file(path);
            tracing::warn!("{}", msg);
            return Ok(LoadStatus::Recovered(msg.to_owned()));
        }

        let mut offset = HEADER_SIZE;
        let mut unique_dep_record_count = 0;
        let mut total_dep_record_count = 0;
        let mut read_failed = false;
        while offset < data.len() {
            match self.read_record(&data, offset, state) {
                Some((next, DepsRecord::Deps { replaced })) => {
                    total_dep_record_count += 1;
                    if !replaced {
                        unique_dep_record_count += 1;
                    }
                    offset = next;
                }
                Some((next, DepsRecord::Path)) => offset = next,
                None => {
                    read_failed = true;
                    break;
                }
            }
        }

        if read_failed {
            // Keep everything up to the last good record and drop the
            // rest, so later appends land after valid data.
            let f = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|err| anyhow!("truncating deps log {}: {}", path.display(), err))?;
            f.set_len(offset as u64)
                .map_err(|err| anyhow!("truncating deps log {}: {}", path.display(), err))?;
            let msg = "premature end of file; recovering";
            tracing::warn!("{}", msg);
            return Ok(LoadStatus::Recovered(msg.to_owned()));
        }

        self.needs_recompaction = total_dep_record_count > MIN_COMPACTION_ENTRY_COUNT
            && total_dep_record_count > unique_dep_record_count * COMPACTION_RATIO;
        Ok(LoadStatus::Loaded)
    }

    /// Decode and apply the record at `offset`, returning the offset of the
    /// next record.  None if the record is truncated or invalid, in which
    /// case nothing was applied.
    fn read_record(&mut self, data: &[u8], offset: usize, state: &mut State) -> Option<(usize, DepsRecord)> {
        if offset + 4 > data.len() {
            return None;
        }
        let header = read_u32(data, offset);
        let is_deps = header & DEPS_RECORD_BIT != 0;
        let size = (header & !DEPS_RECORD_BIT) as usize;
        let start = offset + 4;
        if size > MAX_RECORD_SIZE || start + size > data.len() {
            return None;
        }
        let buf = &data[start..start + size];
        let next = start + size;

        if is_deps {
            if size % 4 != 0 || size < 12 {
                return None;
            }
            let out_id = read_u32(buf, 0) as usize;
            let mtime = (read_u32(buf, 4) as u64 | (read_u32(buf, 8) as u64) << 32) as TimeStamp;
            let mut nodes = Vec::with_capacity((size - 12) / 4);
            for ofs in (12..size).step_by(4) {
                nodes.push(*self.nodes.get(read_u32(buf, ofs) as usize)?);
            }
            if out_id >= self.nodes.len() {
                return None;
            }
            let replaced = self.update_deps(out_id, Deps { mtime, nodes });
            return Some((next, DepsRecord::Deps { replaced }));
        }

        if size <= 4 {
            return None;
        }
        let mut path = &buf[..size - 4];
        // Strip the NUL padding, at most 3 bytes.
        for _ in 0..3 {
            match path {
                [rest @ .., 0] => path = rest,
                _ => break,
            }
        }
        let checksum = read_u32(buf, size - 4);
        let expected_id = self.nodes.len() as u32;
        if path.is_empty() || path.contains(&0) || !checksum != expected_id {
            return None;
        }
        let path = std::str::from_utf8(path).ok()?;
        let node = state.get_node(path, 0);
        if state.node(node).id.is_some() {
            return None;
        }
        state.node_mut(node).id = Some(expected_id);
        self.nodes.push(node);
        Some((next, DepsRecord::Path))
    }

    /// Store deps for an id, returning true if it replaced an earlier entry.
    fn update_deps(&mut self, out_id: usize, deps: Deps) -> bool {
        if out_id >= self.deps.len() {
            self.deps.resize(out_id + 1, None);
        }
        self.deps[out_id].replace(deps).is_some()
    }

    pub fn get_deps(&self, state: &State, node: NodeId) -> Option<&Deps> {
        self.deps_for_id(state.node(node).id()?)
    }

    pub fn deps_for_id(&self, id: u32) -> Option<&Deps> {
        self.deps.get(id as usize)?.as_ref()
    }

    /// Some output whose recorded deps include `node`.
    pub fn get_first_reverse_deps_node(&self, node: NodeId) -> Option<NodeId> {
        self.deps.iter().enumerate().find_map(|(id, deps)| match deps {
            Some(deps) if deps.nodes.contains(&node) => Some(self.nodes[id]),
            _ => None,
        })
    }

    /// Whether a recorded entry for `node` still matters: its producing edge
    /// still exists and still uses the deps log.
    pub fn is_deps_entry_live_for(state: &State, node: NodeId) -> bool {
        match state.node(node).in_edge() {
            Some(edge) => !state.get_binding(edge, "deps").is_empty(),
            None => false,
        }
    }

    /// Prepare to append to the log at `path`, recompacting it first if the
    /// load found it bloated.  The file itself is opened on first write.
    pub fn open_for_write(&mut self, path: impl AsRef<Path>, state: &mut State) -> anyhow::Result<()> {
        let path = path.as_ref();
        if self.needs_recompaction {
            self.recompact(path, state)?;
        }
        self.file_path = Some(path.to_owned());
        Ok(())
    }

    fn open_for_write_if_needed(&mut self) -> anyhow::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let w = RecordWriter::open(path).map_err(|err| anyhow!("opening deps log: {}", err))?;
        self.file = Some(w);
        Ok(())
    }

    fn record_id(&mut self, state: &mut State, node: NodeId) -> anyhow::Result<()> {
        let id = self.nodes.len() as u32;
        self.open_for_write_if_needed()?;
        if let Some(w) = &mut self.file {
            w.write_path(state.node(node).path(), id)
                .map_err(|err| anyhow!("writing deps log: {}", err))?;
        }
        state.node_mut(node).id = Some(id);
        self.nodes.push(node);
        Ok(())
    }

    /// Record the discovered dependencies of `node`.  Writes nothing if the
    /// log already holds exactly this entry.
    pub fn record_deps(
        &mut self,
        state: &mut State,
        node: NodeId,
        mtime: TimeStamp,
        deps: &[NodeId],
    ) -> anyhow::Result<()> {
        let mut made_change = false;
        for &n in std::iter::once(&node).chain(deps) {
            if state.node(n).id().is_none() {
                self.record_id(state, n)?;
                made_change = true;
            }
        }
        if !made_change {
            match self.get_deps(state, node) {
                Some(existing) if existing.mtime == mtime && existing.nodes == deps => return Ok(()),
                _ => {}
            }
        }

        let ids: Vec<u32> = deps
            .iter()
            .filter_map(|&n| state.node(n).id())
            .collect();
        let Some(out_id) = state.node(node).id() else {
            bail!("no deps log id for {}", state.node(node).path());
        };
        self.open_for_write_if_needed()?;
        if let Some(w) = &mut self.file {
            w.write_deps(out_id, mtime, &ids)
                .map_err(|err| anyhow!("writing deps log: {}", err))?;
        }
        self.update_deps(
            out_id as usize,
            Deps {
                mtime,
                nodes: deps.to_vec(),
            },
        );
        Ok(())
    }

    /// Flush and close the log file.
    pub fn close(&mut self) -> anyhow::Result<()> {
        self.open_for_write_if_needed()?;
        if let Some(mut w) = self.file.take() {
            w.w.flush().map_err(|err| anyhow!("closing deps log: {}", err))?;
        }
        Ok(())
    }

    /// Rewrite the log keeping only live entries, with ids renumbered
    /// densely.  The in-memory tables and node ids switch over only once the
    /// new file is in place.
    pub fn recompact(&mut self, path: impl AsRef<Path>, state: &mut State) -> anyhow::Result<()> {
        let path = path.as_ref();
        trace::scope(".ninja_deps recompact", || self.recompact_impl(path, state))
    }

    fn recompact_impl(&mut self, path: &Path, state: &mut State) -> anyhow::Result<()> {
        if let Some(mut w) = self.file.take() {
            w.w.flush()?;
        }

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".recompact");
        let temp_path = PathBuf::from(temp_name);
        match std::fs::remove_file(&temp_path) {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                bail!("removing {}: {}", temp_path.display(), err)
            }
            _ => {}
        }

        let mut w = RecordWriter::open(&temp_path).map_err(|err| anyhow!("recompacting deps log: {}", err))?;
        let mut new_ids: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut new_nodes: Vec<NodeId> = Vec::new();
        let mut new_deps: Vec<Option<Deps>> = Vec::new();

        let mut ensure_id = |node: NodeId, w: &mut RecordWriter| -> anyhow::Result<u32> {
            if let Some(&id) = new_ids.get(&node) {
                return Ok(id);
            }
            let id = new_nodes.len() as u32;
            w.write_path(state.node(node).path(), id)?;
            new_ids.insert(node, id);
            new_nodes.push(node);
            Ok(id)
        };

        for (old_id, deps) in self.deps.iter().enumerate() {
            let Some(deps) = deps else { continue };
            let node = self.nodes[old_id];
            if !Self::is_deps_entry_live_for(state, node) {
                continue;
            }
            let out_id = ensure_id(node, &mut w)?;
            let dep_ids = deps
                .nodes
                .iter()
                .map(|&n| ensure_id(n, &mut w))
                .collect::<anyhow::Result<Vec<u32>>>()?;
            w.write_deps(out_id, deps.mtime, &dep_ids)?;
            let out_id = out_id as usize;
            if out_id >= new_deps.len() {
                new_deps.resize(out_id + 1, None);
            }
            new_deps[out_id] = Some(deps.clone());
        }
        drop(ensure_id);
        w.w.flush()?;
        drop(w);

        std::fs::rename(&temp_path, path).map_err(|err| anyhow!("recompacting deps log: {}", err))?;

        for &node in &self.nodes {
            state.node_mut(node).id = None;
        }
        for (id, &node) in new_nodes.iter().enumerate() {
            state.node_mut(node).id = Some(id as u32);
        }
        self.nodes = new_nodes;
        self.deps = new_deps;
        self.needs_recompaction = false;
        tracing::info!("recompacted {} to {} paths", path.display(), self.nodes.len());
        Ok(())
    }
}

enum DepsRecord {
    Path,
    Deps { replaced: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Rule;

    fn node(state: &mut State, path: &str) -> NodeId {
        state.get_node(path, 0)
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);

        let mut state = State::new();
        let mut log = DepsLog::new();
        log.open_for_write(&path, &mut state).unwrap();
        let out = node(&mut state, "out.o");
        let deps = vec![node(&mut state, "foo.h"), node(&mut state, "bar.h")];
        log.record_deps(&mut state, out, 1, &deps).unwrap();
        let out2 = node(&mut state, "out2.o");
        let deps2 = vec![node(&mut state, "foo.h"), node(&mut state, "bar2.h")];
        log.record_deps(&mut state, out2, 2, &deps2).unwrap();
        log.close().unwrap();
        assert_eq!(log.nodes().len(), 5);

        let mut state2 = State::new();
        let mut log2 = DepsLog::new();
        assert_eq!(log2.load(&path, &mut state2).unwrap(), LoadStatus::Loaded);
        assert_eq!(log2.nodes().len(), 5);
        for (i, &n) in log2.nodes().iter().enumerate() {
            assert_eq!(state2.node(n).id(), Some(i as u32));
            assert_eq!(state2.node(n).path(), state.node(log.nodes()[i]).path());
        }
        let out_in_2 = state2.lookup_node("out.o").unwrap();
        let d = log2.get_deps(&state2, out_in_2).unwrap();
        assert_eq!(d.mtime, 1);
        let paths: Vec<&str> = d.nodes.iter().map(|&n| state2.node(n).path()).collect();
        assert_eq!(paths, vec!["foo.h", "bar.h"]);

        let foo = state2.lookup_node("foo.h").unwrap();
        assert_eq!(log2.get_first_reverse_deps_node(foo), Some(out_in_2));
    }

    #[test]
    fn unchanged_deps_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);

        let mut state = State::new();
        let mut log = DepsLog::new();
        log.open_for_write(&path, &mut state).unwrap();
        let out = node(&mut state, "out.o");
        let deps = vec![node(&mut state, "foo.h")];
        log.record_deps(&mut state, out, 1, &deps).unwrap();
        log.close().unwrap();
        let size = std::fs::metadata(&path).unwrap().len();

        log.open_for_write(&path, &mut state).unwrap();
        log.record_deps(&mut state, out, 1, &deps).unwrap();
        log.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

        log.open_for_write(&path, &mut state).unwrap();
        log.record_deps(&mut state, out, 2, &deps).unwrap();
        log.close().unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > size);
    }

    #[test]
    fn mtime_uses_all_64_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);
        let mtime: TimeStamp = 0x1234_5678_9abc_def0;

        let mut state = State::new();
        let mut log = DepsLog::new();
        log.open_for_write(&path, &mut state).unwrap();
        let out = node(&mut state, "out");
        log.record_deps(&mut state, out, mtime, &[]).unwrap();
        log.close().unwrap();

        let mut state2 = State::new();
        let mut log2 = DepsLog::new();
        log2.load(&path, &mut state2).unwrap();
        let out = state2.lookup_node("out").unwrap();
        assert_eq!(log2.get_deps(&state2, out).unwrap().mtime, mtime);
    }

    #[test]
    fn bad_header_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);
        std::fs::write(&path, b"# ninjadeps\n\x01\x00\x00\x00").unwrap();
        let mut state = State::new();
        let mut log = DepsLog::new();
        assert_eq!(
            log.load(&path, &mut state).unwrap(),
            LoadStatus::Recovered("deps log version change; rebuilding".to_owned())
        );
        assert!(!path.exists());

        std::fs::write(&path, b"garbage").unwrap();
        assert_eq!(
            log.load(&path, &mut state).unwrap(),
            LoadStatus::Recovered("bad deps log signature or version; starting over".to_owned())
        );
    }

    /// Truncating the file at any byte never yields more records than a
    /// longer prefix, and the file is cut back to a record boundary.
    #[test]
    fn truncation_recovers_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);

        let mut state = State::new();
        let mut log = DepsLog::new();
        log.open_for_write(&path, &mut state).unwrap();
        let out = node(&mut state, "out.o");
        let deps = vec![node(&mut state, "foo.h"), node(&mut state, "bar.h")];
        log.record_deps(&mut state, out, 1, &deps).unwrap();
        let out2 = node(&mut state, "out2.o");
        let deps2 = vec![node(&mut state, "foo.h"), node(&mut state, "bar2.h")];
        log.record_deps(&mut state, out2, 2, &deps2).unwrap();
        log.close().unwrap();

        let full = std::fs::read(&path).unwrap();
        let mut prev_nodes = usize::MAX;
        let mut prev_deps = usize::MAX;
        for len in (HEADER_SIZE..=full.len()).rev() {
            std::fs::write(&path, &full[..len]).unwrap();
            let mut state = State::new();
            let mut log = DepsLog::new();
            let status = log.load(&path, &mut state).unwrap();
            let nodes = log.nodes().len();
            let deps = log.deps.iter().filter(|d| d.is_some()).count();
            assert!(nodes <= prev_nodes);
            assert!(deps <= prev_deps);
            prev_nodes = nodes;
            prev_deps = deps;

            if status != LoadStatus::Loaded {
                // The recovered file loads cleanly with the same content.
                let mut state = State::new();
                let mut again = DepsLog::new();
                assert_eq!(again.load(&path, &mut state).unwrap(), LoadStatus::Loaded);
                assert_eq!(again.nodes().len(), nodes);
            }
        }
        assert_eq!(prev_nodes, 0);
    }

    #[test]
    fn overpadded_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);

        let mut data = FILE_SIGNATURE.to_vec();
        data.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
        // "good" plus the checksum for id 0.
        data.extend_from_slice(&8u32.to_le_bytes());
        data.extend_from_slice(b"good");
        data.extend_from_slice(&(!0u32).to_le_bytes());
        let good_len = data.len();
        // "bad" followed by five NULs, more than any writer pads.
        data.extend_from_slice(&12u32.to_le_bytes());
        data.extend_from_slice(b"bad\0\0\0\0\0");
        data.extend_from_slice(&(!1u32).to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        let mut state = State::new();
        let mut log = DepsLog::new();
        assert!(matches!(log.load(&path, &mut state).unwrap(), LoadStatus::Recovered(_)));
        assert_eq!(log.nodes().len(), 1);
        assert!(state.lookup_node("bad").is_none());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len as u64);
    }

    #[test]
    fn appending_after_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);

        let mut state = State::new();
        let mut log = DepsLog::new();
        log.open_for_write(&path, &mut state).unwrap();
        let out = node(&mut state, "out.o");
        let deps = vec![node(&mut state, "foo.h")];
        log.record_deps(&mut state, out, 1, &deps).unwrap();
        log.close().unwrap();
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() - 2]).unwrap();

        let mut state = State::new();
        let mut log = DepsLog::new();
        assert!(matches!(log.load(&path, &mut state).unwrap(), LoadStatus::Recovered(_)));
        log.open_for_write(&path, &mut state).unwrap();
        let out = node(&mut state, "out.o");
        let deps = vec![node(&mut state, "foo.h")];
        log.record_deps(&mut state, out, 1, &deps).unwrap();
        log.close().unwrap();

        let mut state = State::new();
        let mut log = DepsLog::new();
        assert_eq!(log.load(&path, &mut state).unwrap(), LoadStatus::Loaded);
        let out = state.lookup_node("out.o").unwrap();
        assert_eq!(log.get_deps(&state, out).unwrap().nodes.len(), 1);
    }

    #[test]
    fn recompact_keeps_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPS_LOG_FILENAME);

        let mut state = State::new();
        state
            .add_rule(Rule::with_bindings("cc", &[("command", "cc"), ("deps", "gcc")]).unwrap())
            .unwrap();
        state
            .add_rule(Rule::with_bindings("plain", &[("command", "cc")]).unwrap())
            .unwrap();
        state.build("cc").out("live.o").input("live.c").finish().unwrap();
        state.build("plain").out("nodeps.o").input("nodeps.c").finish().unwrap();

        let mut log = DepsLog::new();
        log.open_for_write(&path, &mut state).unwrap();
        let dead = node(&mut state, "dead.o");
        let dead_h = node(&mut state, "dead.h");
        log.record_deps(&mut state, dead, 1, &[dead_h]).unwrap();
        let nodeps = node(&mut state, "nodeps.o");
        log.record_deps(&mut state, nodeps, 1, &[dead_h]).unwrap();
        let live = node(&mut state, "live.o");
        let live_h = node(&mut state, "live.h");
        log.record_deps(&mut state, live, 1, &[live_h]).unwrap();
        log.record_deps(&mut state, live, 2, &[live_h]).unwrap();
        log.close().unwrap();
        let before = std::fs::metadata(&path).unwrap().len();

        log.recompact(&path, &mut state).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        assert_eq!(state.node(dead).id(), None);
        assert_eq!(state.node(live).id(), Some(0));
        assert_eq!(state.node(live_h).id(), Some(1));
        assert_eq!(log.get_deps(&state, live).unwrap().mtime, 2);
        assert!(log.get_deps(&state, dead).is_none());

        let mut state2 = State::new();
        let mut log2 = DepsLog::new();
        assert_eq!(log2.load(&path, &mut state2).unwrap(), LoadStatus::Loaded);
        assert_eq!(log2.nodes().len(), 2);
        let live2 = state2.lookup_node("live.o").unwrap();
        assert_eq!(log2.get_deps(&state2, live2).unwrap().mtime, 2);
    }
}
