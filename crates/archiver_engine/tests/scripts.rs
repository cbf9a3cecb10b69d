use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use archiver_core::{Document, DocumentMeta, RuleEdit, StripSelector};
use archiver_engine::{
    ScriptCache, ScriptEnv, ScriptError, ScriptProgram, ScriptRunner, ScriptSettings,
};
use engine_logging::DebugLog;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const CLEAN: &str = r#"
return {
  domains = { "example.com" },
  set_config = function(rule)
    rule.add_body("article .post")
    rule.add_strip_id_or_class("promo")
  end,
  process_meta = function(meta)
    meta.title = string.gsub(meta.title, " | Example$", "")
    meta.authors = { "Ada" }
  end,
  document_ready = function(dom)
    for _, n in ipairs(dom.select(".share")) do dom.remove(n) end
    local note = dom.create("p")
    dom.set_attr(note, "class", "note")
    dom.append(note, dom.create_text("archived"))
    dom.append(dom.body(), note)
    log.info("cleaned " .. host.domain)
  end,
}
"#;

fn settings(roots: Vec<std::path::PathBuf>) -> ScriptSettings {
    ScriptSettings {
        roots,
        ..ScriptSettings::default()
    }
}

fn program(name: &str, source: &str, settings: &ScriptSettings) -> ScriptProgram {
    ScriptProgram::compile(Path::new(name), source.to_string(), SystemTime::UNIX_EPOCH, settings)
        .unwrap()
}

fn run(
    program: &ScriptProgram,
    settings: &ScriptSettings,
    doc: &mut Document,
    meta: &mut DocumentMeta,
    log: &mut DebugLog,
) -> Result<Vec<RuleEdit>, ScriptError> {
    ScriptRunner::new(settings).run(
        program,
        ScriptEnv {
            host: "example.com",
            url: "https://example.com/story",
            document: doc,
            meta,
            log,
        },
    )
}

#[test]
fn hooks_run_in_order_against_the_host_api() {
    let settings = settings(Vec::new());
    let clean = program("clean.lua", CLEAN, &settings);
    assert_eq!(clean.domains, vec!["example.com".to_string()]);

    let mut doc = Document::parse(
        r#"<body><article><div class="post"><p>text</p></div><div class="share">x</div></article></body>"#,
    );
    let mut meta = DocumentMeta {
        title: "Story | Example".to_string(),
        ..DocumentMeta::default()
    };
    let mut log = DebugLog::new();

    let edits = run(&clean, &settings, &mut doc, &mut meta, &mut log).unwrap();

    assert_eq!(
        edits,
        vec![
            RuleEdit::AddBody("article .post".into()),
            RuleEdit::AddStrip(StripSelector::IdOrClass("promo".into())),
        ]
    );
    assert_eq!(meta.title, "Story");
    assert_eq!(meta.authors, vec!["Ada".to_string()]);
    assert!(doc.select(".share").unwrap().is_empty());
    let note = doc.first("p.note").unwrap().unwrap();
    assert_eq!(doc.text(note), "archived");
    assert_eq!(log.entries()[0].message, "clean.lua: cleaned example.com");
    assert_eq!(log.entries()[0].stage, "scripts");
}

#[test]
fn invalid_selectors_fail_the_hook() {
    let settings = settings(Vec::new());
    let bad = program(
        "bad.lua",
        r#"return { domains = "*", set_config = function(rule) rule.add_body("div[[") end }"#,
        &settings,
    );
    let mut doc = Document::parse("<p>x</p>");
    let err = run(&bad, &settings, &mut doc, &mut DocumentMeta::default(), &mut DebugLog::new())
        .unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Runtime {
            hook: "set_config",
            ..
        }
    ));
}

#[test]
fn runaway_script_hits_the_budget() {
    let settings = ScriptSettings {
        budget: Duration::from_millis(50),
        ..ScriptSettings::default()
    };
    let spin = program(
        "spin.lua",
        r#"return { domains = "*", document_ready = function(dom) while true do end end }"#,
        &settings,
    );
    let mut doc = Document::parse("<p>x</p>");

    let err = run(&spin, &settings, &mut doc, &mut DocumentMeta::default(), &mut DebugLog::new())
        .unwrap_err();
    assert_eq!(
        err,
        ScriptError::Budget {
            name: "spin.lua".into(),
            hook: "document_ready",
            budget_ms: 50,
        }
    );
}

#[test]
fn memory_limit_aborts_the_script() {
    let settings = ScriptSettings {
        memory_limit: 4 * 1024 * 1024,
        ..ScriptSettings::default()
    };
    let hog = program(
        "hog.lua",
        r#"return { domains = "*", document_ready = function(dom)
             local t = {}
             for i = 1, 1e7 do t[i] = string.rep("x", 1024) .. i end
           end }"#,
        &settings,
    );
    let mut doc = Document::parse("<p>x</p>");

    let err = run(&hog, &settings, &mut doc, &mut DocumentMeta::default(), &mut DebugLog::new())
        .unwrap_err();
    assert!(matches!(err, ScriptError::Memory { .. }), "{err:?}");
}

#[test]
fn host_escape_hatches_are_absent() {
    let settings = settings(Vec::new());
    for (name, body) in [
        ("os.lua", r#"os.execute("true")"#),
        ("io.lua", r#"io.open("/etc/passwd")"#),
        ("load.lua", r#"load("return 1")()"#),
        ("pcall.lua", r#"pcall(print, "x")"#),
    ] {
        let source =
            format!(r#"return {{ domains = "*", document_ready = function(dom) {body} end }}"#);
        let script = program(name, &source, &settings);
        let mut doc = Document::parse("<p>x</p>");
        let mut meta = DocumentMeta::default();
        let err = run(&script, &settings, &mut doc, &mut meta, &mut DebugLog::new()).unwrap_err();
        assert!(
            matches!(err, ScriptError::Runtime { hook: "document_ready", .. }),
            "{name}: {err:?}"
        );
    }
}

#[test]
fn predicate_checks_domain_suffix_and_sniff() {
    let settings = settings(Vec::new());
    let sniffing = program(
        "paywall.lua",
        r#"return { domains = { ".News.org", "news.org" }, sniff = "data-paywall" }"#,
        &settings,
    );
    assert_eq!(sniffing.domains, vec!["news.org".to_string()]);
    assert!(sniffing.matches("www.news.org", "<div data-paywall>"));
    assert!(!sniffing.matches("www.news.org", "<div>"));
    assert!(!sniffing.matches("fakenews.org", "<div data-paywall>"));

    let nowhere = program("nowhere.lua", "return {}", &settings);
    assert!(!nowhere.matches("news.org", ""));
}

#[test]
fn malformed_scripts_are_skipped_and_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a_good.lua"), CLEAN).unwrap();
    fs::write(dir.path().join("b_syntax.lua"), "return {").unwrap();
    fs::write(dir.path().join("c_shape.lua"), "return 42").unwrap();
    fs::write(dir.path().join("d_hook.lua"), r#"return { set_config = "no" }"#).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let cache = ScriptCache::new(settings(vec![dir.path().to_path_buf()]));
    let registry = cache.load_all();

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.errors().len(), 3);
    assert!(registry
        .errors()
        .iter()
        .all(|err| matches!(err, ScriptError::Compile { .. })));
}

#[test]
fn non_matching_scripts_are_not_applicable() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("clean.lua"), CLEAN).unwrap();
    fs::write(
        dir.path().join("other.lua"),
        r#"return { domains = "other.org", document_ready = function(dom) dom.remove(dom.body()) end }"#,
    )
    .unwrap();

    let cache = ScriptCache::new(settings(vec![dir.path().to_path_buf()]));
    let registry = cache.load_all();

    let names: Vec<String> = registry
        .applicable("example.com", "<p>x</p>")
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(names, vec!["clean.lua".to_string()]);
}

#[test]
fn changed_modification_time_recompiles_and_replaces() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("site.lua");
    fs::write(&path, r#"return { domains = "a.org" }"#).unwrap();

    let cache = ScriptCache::new(settings(vec![dir.path().to_path_buf()]));
    let first = cache.load_all();
    let original = first.get(&path).unwrap();

    let unchanged = cache.load_all();
    assert!(Arc::ptr_eq(&original, &unchanged.get(&path).unwrap()));

    fs::write(&path, r#"return { domains = "b.org" }"#).unwrap();
    let later = original.modified + Duration::from_secs(5);
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let second = cache.load_all();
    assert_eq!(second.len(), 1);
    let replaced = second.get(&path).unwrap();
    assert!(!Arc::ptr_eq(&original, &replaced));
    assert_eq!(replaced.domains, vec!["b.org".to_string()]);
    assert!(Arc::ptr_eq(&cache.registry(), &second));

    // Runs that took the old snapshot keep the old entry.
    assert_eq!(first.get(&path).unwrap().domains, vec!["a.org".to_string()]);

    fs::remove_file(&path).unwrap();
    assert!(cache.load_all().is_empty());
}
