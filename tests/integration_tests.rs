//! End-to-end tests: memory manager, session offload and streaming.

use std::collections::BTreeMap;

use tempfile::TempDir;

use session_cache::config::Config;
use session_cache::memory::{FixedProbe, MemoryManager};
use session_cache::session::{Binding, CacheContext, ExecutionMode, Namespace, Session};
use session_cache::stream::{DataStream, StreamState};
use session_cache::value::Value;

const MB: usize = 1024 * 1024;

fn large_object() -> Value {
    let mut map = BTreeMap::new();
    map.insert("payload".to_string(), Value::Bytes(vec![3u8; 4 * MB]));
    map.insert("rows".to_string(), Value::List((0..1000).map(Value::Int).collect()));
    Value::Map(map)
}

#[test]
fn test_spill_under_simulated_pressure() {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_cache_dir(tmp.path());
    let probe = FixedProbe::with_rss_mb(config.memory.spill_threshold_mb + 100);
    let manager = MemoryManager::with_probe(&config, Box::new(probe));

    let object = large_object();
    assert!(manager.should_spill(&object, "frame"));

    let handle = manager.spill_to_disk(&object, "frame").unwrap();
    assert_eq!(manager.load_from_disk("frame"), Some(object));

    let report = manager.get_memory_report();
    assert!(report.under_pressure);
    assert_eq!(report.spills.len(), 1);
    assert_eq!(report.spill_bytes, handle.size_bytes());
}

#[test]
fn test_load_of_unknown_spill_is_none() {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_cache_dir(tmp.path());
    let manager = MemoryManager::with_probe(&config, Box::new(FixedProbe::with_rss_mb(10)));
    assert_eq!(manager.load_from_disk("never-spilled"), None);
}

fn context(dir: &TempDir, rss_mb: u64) -> CacheContext {
    CacheContext::open_with_probe(Config::with_cache_dir(dir.path()), Box::new(FixedProbe::with_rss_mb(rss_mb))).unwrap()
}

type TestExecutor = fn(&str, &mut Namespace, ExecutionMode) -> anyhow::Result<()>;

fn bind_large(_code: &str, ns: &mut Namespace, _mode: ExecutionMode) -> anyhow::Result<()> {
    ns.insert("frame", large_object());
    ns.insert("_scratch", large_object());
    ns.insert("count", Value::Int(3));
    Ok(())
}

#[test]
fn test_session_offloads_large_variables_under_pressure() {
    let tmp = TempDir::new().unwrap();
    let mut session = Session::new(context(&tmp, 2000), bind_large as TestExecutor);

    let report = session.execute("frame = load()").unwrap();
    assert_eq!(report.mode, ExecutionMode::Immediate);
    assert!(report.pressure_before);
    assert_eq!(report.cached, vec!["frame".to_string()]);
    assert!(report.spilled.is_empty());

    let ns = session.namespace();
    assert!(ns.binding("frame").unwrap().is_lazy());
    assert!(!ns.binding("_scratch").unwrap().is_lazy());
    assert!(!ns.binding("count").unwrap().is_lazy());

    // The proxy forwards to the original value.
    let Some(Binding::Lazy(lazy)) = ns.binding("frame") else {
        panic!("frame should be lazy");
    };
    assert_eq!(lazy.field("rows").and_then(Value::len), Some(1000));
    assert_eq!(ns.get("frame"), Some(&large_object()));

    let key = lazy.key().unwrap().to_string();
    assert!(session.context().cache().lock().exists(&key));

    // Rebinding drops the proxy, which releases the cache entry.
    session.namespace_mut().insert("frame", Value::Null);
    assert!(!session.context().cache().lock().exists(&key));
    session.shutdown();
}

#[test]
fn test_session_keeps_variables_without_pressure() {
    let tmp = TempDir::new().unwrap();
    let mut session = Session::new(context(&tmp, 100), bind_large as TestExecutor);

    let report = session.execute("for line in open(p): pass").unwrap();
    assert_eq!(report.mode, ExecutionMode::Streaming);
    assert!(report.cached.is_empty());
    assert!(!session.namespace().binding("frame").unwrap().is_lazy());
}

#[test]
fn test_session_spills_when_cache_refuses() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::with_cache_dir(tmp.path());
    for budget in [
        &mut config.tiers.memory_budget,
        &mut config.tiers.sqlite_budget,
        &mut config.tiers.columnar_budget,
        &mut config.tiers.compressed_budget,
    ] {
        *budget = 1024;
    }
    let ctx = CacheContext::open_with_probe(config, Box::new(FixedProbe::with_rss_mb(2000))).unwrap();
    let mut session = Session::new(ctx, bind_large as TestExecutor);

    let report = session.execute("frame = load()").unwrap();
    assert_eq!(report.spilled, vec!["frame".to_string()]);
    assert_eq!(session.namespace().get("frame"), Some(&large_object()));
    assert_eq!(session.context().memory().get_memory_report().spills.len(), 1);
}

#[test]
fn test_executor_error_propagates() {
    let tmp = TempDir::new().unwrap();
    let failing = |_: &str, _: &mut Namespace, _: ExecutionMode| -> anyhow::Result<()> { anyhow::bail!("boom") };
    let mut session = Session::new(context(&tmp, 100), failing);
    assert!(session.execute("x").is_err());
}

#[test]
fn test_streaming_laws() {
    let source: Vec<i64> = (0..50).collect();

    let mapped = DataStream::from_vec(source.clone()).map(|x| x * 3).collect(None);
    assert_eq!(mapped, source.iter().map(|x| x * 3).collect::<Vec<_>>());

    let filtered = DataStream::from_vec(source.clone()).filter(|x| x % 7 == 0).collect(None);
    assert_eq!(filtered, source.iter().copied().filter(|x| x % 7 == 0).collect::<Vec<_>>());

    for n in [0, 1, 25, 50] {
        let taken = DataStream::from_vec(source.clone()).take(n).collect(None);
        assert_eq!(taken, source[..n].to_vec());
    }
}

#[test]
fn test_cancel_yields_strict_prefix() {
    let source: Vec<u32> = (0..1000).collect();
    let mut stream = DataStream::from_vec(source.clone()).map(|x| x + 1).filter(|_| true);
    let token = stream.cancellation_token();

    let mut seen = Vec::new();
    for item in stream.by_ref() {
        seen.push(item);
        if seen.len() == 10 {
            token.cancel();
        }
    }

    let full: Vec<u32> = source.iter().map(|x| x + 1).collect();
    assert!(seen.len() < full.len());
    assert_eq!(seen[..], full[..seen.len()]);
    assert_eq!(stream.state(), StreamState::Cancelled);
}

#[test]
fn test_backpressured_pipeline_through_processor() {
    let tmp = TempDir::new().unwrap();
    let ctx = context(&tmp, 100);
    let processor = ctx.stream_processor();
    let source = processor.produce(|tx| {
        for i in 0..200u64 {
            if !tx.send(i) {
                break;
            }
        }
    });
    let mut out = processor.process_parallel(source, |x| x * x).collect(None);
    out.sort_unstable();
    assert_eq!(out, (0..200u64).map(|x| x * x).collect::<Vec<_>>());
}
