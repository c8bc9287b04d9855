#[path = "../src/backup.rs"]
mod backup;
#[path = "../src/qr.rs"]
mod qr;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn sqlite_bytes(tail: &[u8]) -> Vec<u8> {
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend_from_slice(tail);
    bytes
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("schoold-backup-src");
    let workspace2 = temp_dir("schoold-backup-dst");
    let out_dir = temp_dir("schoold-backup-out");

    let bytes = sqlite_bytes(b"sqlite-test-payload");
    std::fs::write(workspace.join("school.sqlite3"), &bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.backup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/school.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("school.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn checksum_mismatch_is_rejected() {
    let out_dir = temp_dir("schoold-backup-tampered");
    let workspace = temp_dir("schoold-backup-tampered-dst");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(
            format!(
                "{{\"format\":\"{}\",\"dbSha256\":\"{}\"}}",
                backup::BUNDLE_FORMAT_V1,
                "0".repeat(64)
            )
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/school.sqlite3", opts).expect("db entry");
        zip.write_all(b"not what the manifest says").expect("write db");
        zip.finish().expect("finish zip");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace).unwrap_err();
    assert!(e.to_string().contains("checksum mismatch"), "{e}");
    assert!(!workspace.join("school.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn legacy_sqlite_import_is_supported() {
    let out_dir = temp_dir("schoold-backup-legacy");
    let workspace = temp_dir("schoold-backup-legacy-dst");

    let legacy_file = out_dir.join("legacy.sqlite3");
    let bytes = sqlite_bytes(b"legacy-sqlite-copy");
    std::fs::write(&legacy_file, &bytes).expect("write legacy sqlite file");

    let import =
        backup::import_workspace_bundle(&legacy_file, &workspace).expect("import legacy sqlite");
    assert_eq!(import.bundle_format_detected, backup::LEGACY_SQLITE_FORMAT);

    let restored = std::fs::read(workspace.join("school.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn non_sqlite_file_does_not_replace_database() {
    let out_dir = temp_dir("schoold-backup-junk");
    let workspace = temp_dir("schoold-backup-junk-dst");

    let existing = sqlite_bytes(b"existing-workspace");
    std::fs::write(workspace.join("school.sqlite3"), &existing).expect("write existing db");
    let junk = out_dir.join("junk.txt");
    std::fs::write(&junk, b"hello, not a database").expect("write junk file");

    let e = backup::import_workspace_bundle(&junk, &workspace).unwrap_err();
    assert!(e.to_string().contains("not a SQLite database"), "{e}");
    let kept = std::fs::read(workspace.join("school.sqlite3")).expect("read kept db");
    assert_eq!(kept, existing);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundle_with_non_sqlite_entry_is_rejected() {
    let out_dir = temp_dir("schoold-backup-badentry");
    let workspace = temp_dir("schoold-backup-badentry-dst");

    let payload = b"plain text pretending to be a db";
    let bundle_path = out_dir.join("bad-entry.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(
            format!(
                "{{\"format\":\"{}\",\"dbSha256\":\"{}\"}}",
                backup::BUNDLE_FORMAT_V1,
                qr::sha256_hex(payload)
            )
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/school.sqlite3", opts).expect("db entry");
        zip.write_all(payload).expect("write db");
        zip.finish().expect("finish zip");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace).unwrap_err();
    assert!(e.to_string().contains("not a SQLite database"), "{e}");
    assert!(!workspace.join("school.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
