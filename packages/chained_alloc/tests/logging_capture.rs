//! Tests for the events emitted by `LoggingPolicy`, captured through a `tracing` subscriber.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chained_alloc::{Allocator, HeapPolicy, LoggingPolicy, policy_chain};
use tracing::Level;

/// Collects everything the formatter writes so the test can inspect it afterwards.
#[derive(Clone, Debug, Default)]
struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    fn lines_containing(&self, needle: &str) -> usize {
        self.text().lines().filter(|line| line.contains(needle)).count()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a subscriber that records events at every level into the returned output.
fn capture(f: impl FnOnce()) -> CapturedOutput {
    let output = CapturedOutput::default();
    let writer = output.clone();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, f);

    output
}

#[test]
fn logs_each_allocation_and_release() {
    let output = capture(|| {
        let mut allocator =
            Allocator::<u32, _>::new(policy_chain![HeapPolicy, LoggingPolicy::new()]);

        let single = allocator.allocate(1).unwrap();
        let array = allocator.allocate(8).unwrap();

        // SAFETY: Both pointers came from this allocator and are released once.
        unsafe {
            allocator.deallocate(single, 1);
            allocator.deallocate(array, 8);
        }
    });

    assert_eq!(output.lines_containing("logging_policy: allocate"), 2);
    assert_eq!(output.lines_containing("logging_policy: deallocate"), 2);
    assert_eq!(output.lines_containing("bytes=4"), 2);
    assert_eq!(output.lines_containing("bytes=32"), 2);
    assert!(output.text().contains("DEBUG"));
}

#[test]
fn uses_configured_level() {
    let output = capture(|| {
        let logging = LoggingPolicy::builder().level(Level::WARN).build();
        let mut allocator = Allocator::<u64, _>::new(policy_chain![HeapPolicy, logging]);

        let ptr = allocator.allocate(1).unwrap();

        // SAFETY: The pointer came from this allocator and is released once.
        unsafe { allocator.deallocate(ptr, 1) };
    });

    assert_eq!(output.lines_containing("WARN"), 2);
    assert!(!output.text().contains("DEBUG"));
}

#[test]
fn disabled_policy_stays_quiet_until_enabled() {
    let output = capture(|| {
        let logging = LoggingPolicy::builder().enabled(false).build();
        let mut allocator = Allocator::<u64, _>::new(policy_chain![HeapPolicy, logging]);

        let quiet = allocator.allocate(1).unwrap();

        allocator.chain_mut().rest_mut().policy_mut().set_enabled(true);

        // SAFETY: The pointer came from this allocator and is released once.
        unsafe { allocator.deallocate(quiet, 1) };
    });

    assert_eq!(output.lines_containing("logging_policy: allocate"), 0);
    assert_eq!(output.lines_containing("logging_policy: deallocate"), 1);
}

#[test]
fn unserved_requests_are_not_logged_as_allocations() {
    let output = capture(|| {
        // Nothing in this chain produces memory.
        let mut allocator = Allocator::<u64, _>::new(policy_chain![LoggingPolicy::new()]);

        assert!(allocator.allocate(1).is_err());
    });

    assert_eq!(output.lines_containing("logging_policy: allocate"), 0);
}
