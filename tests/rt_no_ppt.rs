use std::fs;
use std::path::Path;

fn source(file: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("src").join(file);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {}: {}", file, e))
}

/// Source with its `#[cfg(test)]` module cut off.
fn runtime_source(file: &str) -> String {
    let text = source(file);
    match text.find("#[cfg(test)]") {
        Some(at) => text[..at].to_string(),
        None => text,
    }
}

/// Everything the audio callback reaches: the run loop, backends, and the
/// rack state it mutates and renders.
const CALLBACK_PATH: [&str; 8] = [
    "engine.rs",
    "backend.rs",
    "rack.rs",
    "plan.rs",
    "graph.rs",
    "port.rs",
    "unit.rs",
    "units.rs",
];

#[test]
fn callback_path_never_prints_or_touches_the_log() {
    for file in CALLBACK_PATH {
        let text = runtime_source(file);
        assert!(!text.contains("println!"), "{} prints from the audio path", file);
        assert!(!text.contains("INVARIANT_LOG"), "{} touches the invariant log", file);
    }
}

/// The recorder used on the callback path is a lock-free bitset.
#[test]
fn invariant_recording_is_lock_free_and_silent() {
    let text = runtime_source("invariant_ppt.rs");
    for banned in ["Mutex", "lock()", "eprintln!", "println!", "format!", "lazy_static"] {
        assert!(
            !text.contains(banned),
            "invariant_ppt.rs uses {} outside tests",
            banned
        );
    }
}

/// Audio-thread state never logs.
#[test]
fn audio_thread_modules_do_not_log() {
    for file in ["rack.rs", "plan.rs", "port.rs", "unit.rs", "units.rs", "graph.rs"] {
        assert!(
            !source(file).contains("tracing::"),
            "{} runs on the audio thread and must not log",
            file
        );
    }
}
