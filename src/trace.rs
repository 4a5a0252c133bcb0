//! Chrome trace output, enabled with `-d trace`.
//!
//! The resulting file can be loaded in chrome://tracing or Perfetto.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(false);
static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_complete(&mut self, name: &str, start: Instant, end: Instant) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros(),
        )
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.write_complete("main", self.start, Instant::now())?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

fn lock() -> std::sync::MutexGuard<'static, Option<Trace>> {
    TRACE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *lock() = Some(trace);
    ENABLED.store(true, Ordering::Relaxed);
    Ok(())
}

/// Run `f`, recording its duration under `name` if tracing is enabled.
/// Scopes may nest; the lock is only held while writing the event.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !ENABLED.load(Ordering::Relaxed) {
        return f();
    }
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    if let Some(trace) = lock().as_mut() {
        // A failed trace write shouldn't fail the work being traced.
        let _ = trace
            .write_complete(name, start, end)
            .and_then(|()| writeln!(trace.w, ","));
    }
    result
}

pub fn close() -> std::io::Result<()> {
    ENABLED.store(false, Ordering::Relaxed);
    match lock().take() {
        Some(mut trace) => trace.close(),
        None => Ok(()),
    }
}
