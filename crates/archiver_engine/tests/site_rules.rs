use std::fs;

use archiver_engine::{load_rules_dir, RuleLoadError, SiteRules};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn rule_files_are_keyed_by_file_stem() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("example.com.json"), r#"{"body": ["article"]}"#).unwrap();
    fs::write(dir.path().join(".blog.net.json"), r#"{"strip": [{"css": ".ad"}]}"#).unwrap();
    fs::write(dir.path().join("broken.org.json"), r#"{"body": "#).unwrap();
    fs::write(dir.path().join("README.md"), "not a rule").unwrap();

    let (index, errors) = load_rules_dir(dir.path());

    assert_eq!(index.len(), 2);
    assert_eq!(
        index.lookup("example.com").unwrap().body,
        vec!["article".to_string()]
    );
    assert!(index.resolve("x.blog.net").is_some());
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], RuleLoadError::Rule(_)));
}

#[test]
fn missing_directory_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let (index, errors) = load_rules_dir(&dir.path().join("absent"));
    assert!(index.is_empty());
    assert!(matches!(errors[0], RuleLoadError::Directory { .. }));
}

#[test]
fn reload_swaps_the_whole_index() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.org.json"), r#"{"body": ["main"]}"#).unwrap();

    let (rules, errors) = SiteRules::load(dir.path());
    assert!(errors.is_empty());
    let before = rules.current();

    fs::remove_file(dir.path().join("a.org.json")).unwrap();
    fs::write(dir.path().join("b.org.json"), r#"{"body": [".post"]}"#).unwrap();
    assert!(rules.reload().is_empty());

    let after = rules.current();
    assert!(before.lookup("a.org").is_some());
    assert!(after.lookup("a.org").is_none());
    assert!(after.lookup("b.org").is_some());
}
