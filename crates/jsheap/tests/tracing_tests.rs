//! Integration tests for the `tracing` feature.
//!
//! Collection cycles should emit a `gc_collect` span with phase events and,
//! when statistics are enabled, a per-cycle summary.

#![cfg(feature = "tracing")]

use std::io;
use std::sync::{Arc, Mutex};

use jsheap::{HeapConfig, MemoryManager, ObjectClass};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;

static BLOB: ObjectClass = ObjectClass::leaf("Blob");

#[derive(Clone, Default)]
struct SharedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn contents(&self) -> String {
        String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
    }
}

struct SharedWriterGuard<'a> {
    buffer: &'a Arc<Mutex<Vec<u8>>>,
}

impl io::Write for SharedWriterGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            buffer: &self.buffer,
        }
    }
}

fn capture<F: FnOnce()>(f: F) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_ansi(false)
        .with_writer(writer.clone())
        .finish();
    let guard = subscriber.set_default();
    f();
    drop(guard);
    writer.contents()
}

#[test]
fn test_collection_emits_span_and_phase_events() {
    let output = capture(|| {
        let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
        mm.allocate(&BLOB, 32, 0);
        mm.run_gc();
    });
    assert!(output.contains("gc_collect"), "missing span, got: {output}");
    assert!(output.contains("trigger=\"explicit\"") || output.contains("trigger=explicit"));
    assert!(output.contains("phase_start"));
    assert!(output.contains("phase_end"));
    assert!(!output.contains("GC cycle complete"), "summary requires stats mode");
}

#[test]
fn test_stats_mode_logs_cycle_summary() {
    let output = capture(|| {
        let mut mm = MemoryManager::with_config(HeapConfig::new().stats(true)).unwrap();
        for _ in 0..10 {
            mm.allocate(&BLOB, 64, 0);
        }
        mm.run_gc();
        mm.dump_stats();
    });
    assert!(output.contains("GC cycle complete"), "got: {output}");
    assert!(output.contains("objects_reclaimed=10"));
    assert!(output.contains("size class"));
    assert!(output.contains("item_size=64"));
}

#[test]
fn test_blocked_collection_is_silent() {
    let output = capture(|| {
        let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
        mm.set_gc_blocked(true);
        mm.run_gc();
    });
    assert!(!output.contains("gc_collect"));
}
