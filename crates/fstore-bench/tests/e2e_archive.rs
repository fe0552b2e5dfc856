use std::io::{Read, Write};

use fstore_db::Store;
use tempfile::TempDir;

/// 260 MiB of repeating "abcd", written and read in 1 MiB slices.
const BIG_TOTAL: usize = 260 * 1024 * 1024;
const SLICE: usize = 1024 * 1024;

#[test]
fn e2e_big_file_round_trip_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("big.forensicstore");
    let pattern: Vec<u8> = b"abcd".iter().copied().cycle().take(SLICE).collect();

    {
        let store = Store::create(&path).unwrap();
        let mut writer = store.fs().create("/big.bin").unwrap();
        for _ in 0..(BIG_TOTAL / SLICE) {
            writer.write_all(&pattern).unwrap();
        }
        writer.close().unwrap();
        store.close().unwrap();
    }

    let store = Store::open(&path).unwrap();
    assert_eq!(store.fs().stat("/big.bin").unwrap().size, 272_629_760);

    let mut reader = store.fs().open("/big.bin").unwrap();
    let mut buf = vec![0u8; SLICE];
    let mut total = 0usize;
    loop {
        let mut filled = 0;
        while filled < SLICE {
            let n = reader.read(&mut buf[filled..]).unwrap();
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        assert_eq!(&buf[..filled], &pattern[..filled]);
        total += filled;
    }
    assert_eq!(total, BIG_TOTAL);
}

#[test]
fn e2e_directory_semantics() {
    let store = Store::in_memory().unwrap();
    store.fs().mkdir_all("/a/b/c").unwrap();

    assert!(store.fs().stat("/a/b").unwrap().is_dir);
    let children: Vec<String> = store
        .fs()
        .readdir("/a")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(children, ["/a/b"]);
}

#[test]
fn e2e_store_file_dedup_and_walk() {
    let store = Store::in_memory().unwrap();
    for _ in 0..2 {
        let (_, mut writer) = store.store_file("export/report.pdf").unwrap();
        writer.write_all(b"pdf").unwrap();
        writer.close().unwrap();
    }

    let names: Vec<String> = store
        .fs()
        .walk("/")
        .unwrap()
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["/export/report.pdf", "/export/report_0.pdf"]);
}

#[test]
fn e2e_archive_and_elements_share_one_snapshot() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("snap.forensicstore");

    {
        let store = Store::create(&path).unwrap();
        let (stdout_path, mut writer) = store.store_file("out.log").unwrap();
        writer.write_all(b"output").unwrap();
        writer.close().unwrap();
        store
            .insert(serde_json::json!({
                "type": "process",
                "name": "ls",
                "stdout_path": stdout_path,
            }))
            .unwrap();
        store.close().unwrap();
    }

    // A reader opening after the writer closed sees both sides.
    let store = Store::open(&path).unwrap();
    let elements = store.all().unwrap();
    assert_eq!(elements.len(), 1);
    let mut body = String::new();
    store
        .load_file(elements[0]["stdout_path"].as_str().unwrap())
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert_eq!(body, "output");
}
