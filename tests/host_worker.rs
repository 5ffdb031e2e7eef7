//! Runs the host binary against its own local worker over real pipes.

use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn read_until<R: BufRead>(lines: &mut std::io::Lines<R>, seen: &mut Vec<Value>, done: impl Fn(&[Value]) -> bool) {
    while !done(seen) {
        let line = lines
            .next()
            .expect("host stdout closed early")
            .expect("read host stdout");
        let value: Value = serde_json::from_str(&line).expect("host emitted a non-JSON line");
        seen.push(value);
    }
}

fn has_status(seen: &[Value], status: &str) -> bool {
    seen.iter().any(|v| v["status"] == status)
}

#[test]
fn host_relays_worker_and_saves_builds() {
    let dir = TempDir::new().unwrap();
    let data = dir.path();
    fs::write(
        data.join("talent_builds.json"),
        r#"{"_README": "class -> spec -> kind", "warrior": {"arms": {"pve": "X"}}}"#,
    )
    .unwrap();
    fs::create_dir_all(data.join("talent_cache")).unwrap();
    fs::write(
        data.join("talent_cache").join("mage_frost.json"),
        r#"{"class_nodes": [{"id": 1}], "spec_nodes": []}"#,
    )
    .unwrap();

    let mut host = Command::new(env!("CARGO_BIN_EXE_companion-host"))
        .arg("--data-dir")
        .arg(data)
        .arg("--log-level")
        .arg("warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn host");

    let mut stdin = host.stdin.take().unwrap();
    let mut lines = BufReader::new(host.stdout.take().unwrap()).lines();
    let mut seen = Vec::new();

    // Preload and handshake: builds, cached tree, ready, then the roster.
    read_until(&mut lines, &mut seen, |s| {
        s.iter().any(Value::is_array)
            && has_status(s, "talent_builds_loaded")
            && has_status(s, "talent_tree")
    });
    assert_eq!(seen.iter().filter(|v| v["status"] == "ready").count(), 1);
    let builds = seen
        .iter()
        .find(|v| v["status"] == "talent_builds_loaded")
        .unwrap();
    assert_eq!(builds["builds"], json!({"warrior": {"arms": {"pve": "X"}}}));
    let tree = seen.iter().find(|v| v["status"] == "talent_tree").unwrap();
    assert_eq!((tree["class"].as_str(), tree["spec"].as_str()), (Some("mage"), Some("frost")));
    assert_eq!(seen.iter().find(|v| v.is_array()).unwrap(), &json!([]));

    writeln!(stdin, "ADD_CHARACTER:eu:Silvermoon:Jaina").unwrap();
    writeln!(stdin, "SAVE_BUILD_STRING:warrior:fury:pve:1A2B3C").unwrap();
    stdin.flush().unwrap();

    seen.clear();
    read_until(&mut lines, &mut seen, |s| {
        has_status(s, "added") && has_status(s, "build_string_saved")
    });
    let added = seen.iter().find(|v| v["status"] == "added").unwrap();
    assert_eq!(added["character"]["name"], "Jaina");

    drop(stdin);
    let status = host.wait().unwrap();
    assert!(status.success());

    let stored: Value =
        serde_json::from_str(&fs::read_to_string(data.join("talent_builds.json")).unwrap())
            .unwrap();
    assert_eq!(
        stored,
        json!({
            "_README": "class -> spec -> kind",
            "warrior": {"arms": {"pve": "X"}, "fury": {"pve": "1A2B3C"}}
        })
    );

    let roster: Value =
        serde_json::from_str(&fs::read_to_string(data.join("characters.json")).unwrap()).unwrap();
    assert_eq!(roster[0]["name"], "Jaina");
}
