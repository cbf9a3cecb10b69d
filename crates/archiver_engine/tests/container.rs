use std::fs;

use archiver_engine::{Container, ContainerError, StoragePaths, INDEX_FILE, LOG_FILE, PROPS_FILE};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write(path: &std::path::Path, index: &str) -> std::path::PathBuf {
    let mut writer = Container::create(path);
    writer.add("_resources/b.png", vec![2u8; 16]).unwrap();
    writer.add(LOG_FILE, "[INFO] archive: done\n").unwrap();
    writer.add(INDEX_FILE, index).unwrap();
    writer.add(PROPS_FILE, "{}").unwrap();
    writer.add("_resources/a.jpg", vec![1u8; 16]).unwrap();
    writer.commit().unwrap()
}

#[test]
fn commit_creates_parent_dirs_and_reads_back() {
    let temp = TempDir::new().unwrap();
    let paths = StoragePaths::new(temp.path());
    let path = paths.container_path("ab12cd").unwrap();
    assert!(!path.parent().unwrap().exists());

    write(&path, "<section>one</section>");

    let mut reader = Container::open(&path).unwrap();
    assert_eq!(
        reader.names(),
        vec![
            INDEX_FILE,
            PROPS_FILE,
            LOG_FILE,
            "_resources/a.jpg",
            "_resources/b.png"
        ]
    );
    assert_eq!(
        reader.list_resources(),
        vec!["_resources/a.jpg", "_resources/b.png"]
    );
    assert_eq!(reader.get_text(INDEX_FILE).unwrap(), "<section>one</section>");
    assert_eq!(reader.get_file("_resources/a.jpg").unwrap(), vec![1u8; 16]);
    assert!(matches!(
        reader.get_file("_resources/missing.png"),
        Err(ContainerError::NotFound(_))
    ));
}

#[test]
fn commit_replaces_previous_archive_without_leftovers() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bookmarks/x1/x1.zip");

    write(&path, "first");
    let mut second = Container::create(&path);
    second.add(INDEX_FILE, "second").unwrap();
    second.commit().unwrap();

    let mut reader = Container::open(&path).unwrap();
    assert_eq!(reader.get_text(INDEX_FILE).unwrap(), "second");
    assert!(reader.list_resources().is_empty());

    let siblings: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(siblings, vec![std::ffi::OsString::from("x1.zip")]);
}

#[test]
fn same_entries_give_identical_bytes() {
    let temp = TempDir::new().unwrap();
    let a = write(&temp.path().join("a/a.zip"), "same");
    let b = write(&temp.path().join("b/b.zip"), "same");
    assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
}

#[test]
fn failed_commit_leaves_old_archive_intact() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("blocked");
    fs::write(&blocker, "not a directory").unwrap();

    let mut writer = Container::create(blocker.join("c.zip"));
    writer.add(INDEX_FILE, "x").unwrap();
    assert!(writer.commit().is_err());
    assert_eq!(fs::read_to_string(&blocker).unwrap(), "not a directory");
}
