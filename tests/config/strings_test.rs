//! Tests for `src/strings.rs`.

use feedcast::strings::{keys, Strings};

const DOC: &str = r#"{
    "en-us": {
        "welcome": "Hello reader!",
        "help": ["/last_feed - latest\n", "/stop - leave\n"]
    },
    "fa-ir": {
        "welcome": "سلام",
        "last-feed": "آخرین مطلب"
    }
}"#;

#[test]
fn selected_language_overrides_builtins() {
    let strings = Strings::from_json(DOC, "fa-ir").expect("document should parse");

    assert_eq!(strings.get(keys::WELCOME), "سلام");
    assert_eq!(strings.get(keys::LAST_FEED), "آخرین مطلب");
    // Keys absent from the table keep their built-in text.
    assert_eq!(strings.get(keys::UNKNOWN), "Unknown command.");
    assert_eq!(strings.get(keys::HELP), Strings::builtin().get(keys::HELP));
}

#[test]
fn missing_language_falls_back_to_en_us() {
    let strings = Strings::from_json(DOC, "de-de").expect("document should parse");
    assert_eq!(strings.get(keys::WELCOME), "Hello reader!");
}

#[test]
fn line_lists_are_concatenated() {
    let strings = Strings::from_json(DOC, "en-us").expect("document should parse");
    assert_eq!(strings.get(keys::HELP), "/last_feed - latest\n/stop - leave\n");
}

#[test]
fn document_without_either_language_keeps_builtins() {
    let strings = Strings::from_json(r#"{"it-it": {"welcome": "Ciao"}}"#, "fa-ir")
        .expect("document should parse");
    assert_eq!(strings.get(keys::WELCOME), Strings::builtin().get(keys::WELCOME));
}

#[test]
fn unknown_keys_echo_back() {
    assert_eq!(Strings::builtin().get("no-such-key"), "no-such-key");
}

#[test]
fn load_reads_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("strings.json");
    std::fs::write(&path, DOC).expect("should write strings file");

    let strings = Strings::load(&path, "en-us").expect("file should load");
    assert_eq!(strings.get(keys::WELCOME), "Hello reader!");
}

#[test]
fn load_errors_name_the_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("strings.json");

    let err = Strings::load(&path, "en-us").expect_err("missing file should fail");
    assert!(format!("{err:#}").contains("strings.json"));

    std::fs::write(&path, "[1, 2]").expect("should write strings file");
    let err = Strings::load(&path, "en-us").expect_err("wrong shape should fail");
    assert!(format!("{err:#}").contains("failed to parse strings file"));
}
