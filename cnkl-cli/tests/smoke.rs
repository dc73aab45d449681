use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn write_random(path: &std::path::Path, bytes: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    std::fs::write(path, data).unwrap();
}

fn cnkl() -> Command {
    let mut cmd = Command::cargo_bin("cnkl").unwrap();
    cmd.env_remove("CNKL_LOG").env_remove("CNKL_CHUNK_SIZE").env_remove("CNKL_JOBS");
    cmd
}

#[test]
fn generate_then_check_happy_path() {
    let td = assert_fs::TempDir::new().unwrap();
    let data = td.child("payload.bin");
    write_random(data.path(), 300 * 1024, 1);
    let cl = td.child("payload.bin.chunklist");

    cnkl()
        .args(["-g", "--chunk-size", "64K", data.path().to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("generated at:"));
    cl.assert(predicate::path::is_file());
    assert!(std::fs::metadata(cl.path()).unwrap().len() > 0);

    cnkl()
        .args(["-c", "-l", cl.path().to_str().unwrap(), data.path().to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("verify succeeded."));
}

#[test]
fn check_discovers_chunklist_next_to_file() {
    let td = assert_fs::TempDir::new().unwrap();
    let data = td.child("disk.img");
    write_random(data.path(), 100 * 1024, 2);

    cnkl()
        .args(["-g", "--chunk-size", "16K", "--digest", "blake3", data.path().to_str().unwrap()])
        .assert()
        .success();

    // no -c, no -l: check mode with discovery is the default
    cnkl().arg(data.path()).assert().success();

    // the legacy extension is found as well
    std::fs::rename(
        td.child("disk.img.chunklist").path(),
        td.child("disk.img.integrityDataV1").path(),
    )
    .unwrap();
    cnkl().arg("-c").arg(data.path()).assert().success();
}

#[test]
fn corruption_fails_with_exit_one() {
    let td = assert_fs::TempDir::new().unwrap();
    let data = td.child("f.bin");
    write_random(data.path(), 64 * 1024, 3);
    cnkl()
        .args(["-g", "--chunk-size", "4K", data.path().to_str().unwrap()])
        .assert()
        .success();

    {
        use std::io::{Seek, SeekFrom, Write};
        let mut f =
            std::fs::OpenOptions::new().read(true).write(true).open(data.path()).unwrap();
        f.seek(SeekFrom::Start(5 * 4096 + 100)).unwrap();
        f.write_all(&[0xFF; 16]).unwrap();
        f.seek(SeekFrom::Start(9 * 4096)).unwrap();
        f.write_all(&[0x00; 16]).unwrap();
    }

    cnkl()
        .arg(data.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("verify failed."))
        .stderr(predicate::str::contains("bad chunks: [5]"))
        .stderr(predicate::str::contains("WARN").not());

    let out = cnkl()
        .args(["--accumulate", "--jobs", "4", "--json"])
        .arg(data.path())
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["status"], "invalid");
    assert_eq!(v["failing_chunks"], serde_json::json!([5, 9]));
    assert_eq!(v["cause"]["kind"], "digest_mismatch");
    assert_eq!(v["cause"]["chunk"], 5);
}

#[test]
fn appended_bytes_fail_length_check() {
    let td = assert_fs::TempDir::new().unwrap();
    let data = td.child("grow.bin");
    write_random(data.path(), 10_000, 4);
    cnkl().args(["-g", data.path().to_str().unwrap()]).assert().success();
    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(data.path()).unwrap();
        f.write_all(b"tail").unwrap();
    }
    cnkl()
        .arg(data.path())
        .assert()
        .code(1)
        .stderr(predicate::function(|err: &str| err.matches("10000").count() == 1))
        .stderr(predicate::str::contains("chunklist expects 10000"))
        .stderr(predicate::str::contains("WARN").not());
}

#[test]
fn dump_prints_chunklist_json() {
    let td = assert_fs::TempDir::new().unwrap();
    let data = td.child("d.bin");
    data.write_binary(b"hello\n").unwrap();
    cnkl().args(["-g", data.path().to_str().unwrap()]).assert().success();
    cnkl()
        .args(["--dump", data.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03",
        ))
        .stdout(predicate::str::contains("\"file_length\": 6"));
}
