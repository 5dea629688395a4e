//! Integration tests for the tenebra inspection CLI.
#![forbid(unsafe_code)]

use assert_cmd::Command;
use tempfile::NamedTempFile;

use tenebra::freelist::Freelist;
use tenebra::page::Page;
use tenebra::store::PageStore;
use tenebra::types::Pgid;

fn seed_db(path: &std::path::Path) -> Pgid {
    let mut store = PageStore::open(path).expect("create store");
    store.grow(6).expect("grow");

    let mut list = Freelist::new();
    list.merge_ids(&[Pgid(3), Pgid(4), Pgid(6)]);

    let freelist_pgid = Pgid(2);
    let mut page = Page::sized_for(freelist_pgid, list.size(), store.page_size());
    list.write(&mut page).expect("write freelist");
    store.write_page(&page).expect("persist freelist");
    store.sync().expect("sync");
    freelist_pgid
}

#[test]
fn version_reports_package_version() {
    let output = Command::cargo_bin("tenebra")
        .expect("binary")
        .arg("version")
        .output()
        .expect("run version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf-8");
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    assert!(stdout.contains("OS/Arch"));
}

#[test]
fn surgery_dump_freelist_prints_spans() {
    let tmp = NamedTempFile::new().expect("temp file");
    let pgid = seed_db(tmp.path());

    let output = Command::cargo_bin("tenebra")
        .expect("binary")
        .args(["surgery", "dump-freelist"])
        .arg(tmp.path())
        .arg("--page")
        .arg(pgid.to_string())
        .output()
        .expect("run dump-freelist");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf-8");
    assert!(stdout.contains("free pages: 3"));
    assert!(stdout.contains("(2 pages)"));
}

#[test]
fn surgery_abandon_freelist_empties_the_record() {
    let tmp = NamedTempFile::new().expect("temp file");
    let pgid = seed_db(tmp.path());

    Command::cargo_bin("tenebra")
        .expect("binary")
        .args(["surgery", "abandon-freelist"])
        .arg(tmp.path())
        .arg("--page")
        .arg(pgid.to_string())
        .assert()
        .success();

    let mut store = PageStore::open(tmp.path()).expect("reopen");
    let page = store.read_page(pgid).expect("read freelist page");
    let mut list = Freelist::new();
    list.read(&page).expect("decode freelist");
    assert_eq!(list.count(), 0);
}

#[test]
fn dump_freelist_fails_on_non_freelist_page() {
    let tmp = NamedTempFile::new().expect("temp file");
    seed_db(tmp.path());

    Command::cargo_bin("tenebra")
        .expect("binary")
        .args(["surgery", "dump-freelist"])
        .arg(tmp.path())
        .args(["--page", "0"])
        .assert()
        .failure();
}
