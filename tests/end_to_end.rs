//! Integration tests for the six end-to-end scenarios and the cross-cutting invariants they
//! exercise: round-trip without a dictionary, round-trip with a dictionary, namespace fallback,
//! retrain trigger, id quarantine, and publish-then-GC.

use quiverdict::config::Config;
use quiverdict::engine::Engine;
use quiverdict::table::DictId;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn write_dict_manifest(dir: &Path, stem: &str, id: Option<u16>, namespaces: &str, blob: &[u8]) {
    std::fs::write(dir.join(format!("{stem}.dict")), blob).unwrap();
    let id_line = id.map_or_else(String::new, |id| format!("id = {id}\n"));
    let body = format!(
        "{id_line}dict_file = {stem}.dict\nnamespaces = {namespaces}\ncreated = 2024-01-01T00:00:00Z\n"
    );
    let mut f = std::fs::File::create(dir.join(format!("{stem}.mf"))).unwrap();
    f.write_all(body.as_bytes()).unwrap();
}

/// Scenario 1: round-trip, no dictionary.
#[test]
fn round_trip_no_dictionary() {
    let engine = Engine::new(Config::default());
    let value = "A".repeat(2000);
    let (frame, did) = engine.encode(b"anykey", value.as_bytes());
    assert_eq!(did, DictId::NONE);
    assert!(!frame.is_empty());
    let restored = engine.decode(&frame, did).expect("decode");
    assert_eq!(restored, value.as_bytes());
}

/// Scenario 2: round-trip with a dictionary selected by namespace.
#[test]
fn round_trip_with_dictionary() {
    let dir = tempfile::tempdir().unwrap();
    let dict_blob = "feed_sample_common_prefix_text ".repeat(200);
    write_dict_manifest(dir.path(), "feed-dict", Some(7), "feed:", dict_blob.as_bytes());

    let mut config = Config::default();
    config.compression.dict_dir = dir.path().to_path_buf();
    let engine = Engine::new(config);
    engine.reload_dictionaries().expect("reload");

    let value = "feed_sample_123_".repeat(50);
    let (frame, did) = engine.encode(b"feed:user/42", value.as_bytes());
    assert_eq!(did, DictId(7));
    let restored = engine.decode(&frame, did).expect("decode");
    assert_eq!(restored, value.as_bytes());
}

/// Scenario 3: namespace fallback to `default` when no namespace prefix matches.
#[test]
fn namespace_fallback_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let user_blob = "user_profile_fields_common_text ".repeat(200);
    let default_blob = "generic_default_payload_text ".repeat(200);
    write_dict_manifest(dir.path(), "user-dict", Some(3), "user:", user_blob.as_bytes());
    write_dict_manifest(dir.path(), "default-dict", Some(1), "default", default_blob.as_bytes());

    let mut config = Config::default();
    config.compression.dict_dir = dir.path().to_path_buf();
    let engine = Engine::new(config);
    engine.reload_dictionaries().expect("reload");

    let table = engine.current_table();
    assert_eq!(table.pick_by_key(b"other:x").unwrap().id, DictId(1));
    assert_eq!(table.pick_by_key(b"user:42").unwrap().id, DictId(3));
}

/// Scenario 4: a sustained efficiency regression triggers a retrain recommendation. Exercised
/// directly against `EfficiencyTracker`, the same component `Engine` holds internally and the
/// trainer loop consults on every iteration.
#[test]
fn retrain_triggers_on_sustained_regression() {
    use quiverdict::efficiency::EfficiencyTracker;

    let tracker = EfficiencyTracker::new();
    tracker.configure(true, 0, 0, 0.3, 0.2);
    tracker.init(0);

    tracker.on_observation(1000, 500); // seeds ewma = baseline = 0.5
    for _ in 0..50 {
        tracker.on_observation(1000, 800); // ratio 0.8, a sustained regression
    }
    assert!(tracker.should_retrain(1000));
}

/// Scenario 5: id quarantine. A recently-retired id must not be handed to a newcomer until the
/// quarantine window elapses.
#[test]
fn id_quarantine_skips_recently_retired_ids() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.dict"), vec![1u8; 2048]).unwrap();
    std::fs::write(dir.path().join("b.dict"), vec![2u8; 2048]).unwrap();
    std::fs::write(dir.path().join("c.dict"), vec![3u8; 2048]).unwrap();

    let mut f = std::fs::File::create(dir.path().join("a.mf")).unwrap();
    f.write_all(b"id = 1\ndict_file = a.dict\ncreated = 2024-01-01T00:00:00Z\n").unwrap();

    let recent = chrono::Utc::now().to_rfc3339();
    let mut f = std::fs::File::create(dir.path().join("b.mf")).unwrap();
    f.write_all(format!("id = 2\ndict_file = b.dict\ncreated = 2024-01-01T00:00:00Z\nretired = {recent}\n").as_bytes())
        .unwrap();

    let mut f = std::fs::File::create(dir.path().join("c.mf")).unwrap();
    f.write_all(b"dict_file = c.dict\ncreated = 2024-01-01T00:00:00Z\n").unwrap();

    let mut config = Config::default();
    config.compression.dict_dir = dir.path().to_path_buf();
    config.gc.gc_quarantine_period_s = 60;
    let engine = Engine::new(config);
    let status = engine.reload_dictionaries().expect("reload");
    assert_eq!(status.loaded, 3);

    let table = engine.current_table();
    let c_id = table.all.iter().find(|m| m.dict_path.ends_with("c.dict")).unwrap().id;
    assert_eq!(c_id, DictId(3), "id 2 is quarantined, so the next free id is 3");
}

/// Scenario 6: publishing an updated table retires the old one, but a dictionary still referenced
/// by the new table keeps a positive pool reference count until no table references it anymore.
#[test]
fn publish_then_gc_keeps_shared_dictionary_alive() {
    let dir = tempfile::tempdir().unwrap();
    let blob = "shared_dictionary_payload_text ".repeat(200);
    write_dict_manifest(dir.path(), "shared", Some(5), "default", blob.as_bytes());

    let mut config = Config::default();
    config.compression.dict_dir = dir.path().to_path_buf();
    config.gc.gc_cool_period_s = 0;
    let engine = Arc::new(Engine::new(config));
    engine.on_role_change(quiverdict::env::Role::Leader);

    engine.reload_dictionaries().expect("reload g1");
    engine.reload_dictionaries().expect("reload g2 (identical)");

    // Give the GC thread a moment to reclaim the superseded generation.
    std::thread::sleep(Duration::from_millis(300));

    let table = engine.current_table();
    assert!(table.lookup_by_id(DictId(5)).is_some(), "id 5 must still resolve after GC settles");

    engine.on_role_change(quiverdict::env::Role::Follower);
}

/// Boundary: a value shorter than the configured minimum is always stored raw.
#[test]
fn below_min_size_is_never_compressed() {
    let mut config = Config::default();
    config.compression.min_comp_size = 1000;
    let engine = Engine::new(config);
    let (frame, did) = engine.encode(b"k", b"short value");
    assert!(frame.is_empty());
    assert_eq!(did, DictId::RAW);
    assert!(!Engine::is_compressed(b"short value"));
}

/// Boundary: decode with an id unknown to the current table fails without allocating output.
#[test]
fn decode_with_unknown_id_fails() {
    let engine = Engine::new(Config::default());
    let err = engine.decode(b"whatever", DictId(4321)).unwrap_err();
    assert!(matches!(err, quiverdict::error::Error::UnknownDictionary(4321)));
}

/// Boundary: scanning a directory with no manifests at all is an error.
#[test]
fn scan_of_empty_directory_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.compression.dict_dir = dir.path().to_path_buf();
    let engine = Engine::new(config);
    assert!(engine.reload_dictionaries().is_err());
}
