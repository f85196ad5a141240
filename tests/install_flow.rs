//! End-to-end flows through the public API: origin metadata to installed mod
//! directory, local archive imports, and the search-then-install journey.

use divaforge::api::OriginRegistry;
use divaforge::gamebanana::GameBanana;
use divaforge::manager::ModManager;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::thread;
use zip::write::SimpleFileOptions;

/// Unroutable endpoint; any request against it fails fast.
const DEAD: &str = "http://127.0.0.1:1";

fn stub_http_once(
    status: u16,
    content_type: &str,
    body: &[u8],
) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let content_type = content_type.to_string();
    let body = body.to_vec();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|window| window == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
        let response_head = format!(
            "HTTP/1.1 {status} OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(response_head.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
        let _ = stream.flush();
    });
    (base, handle)
}

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn game_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    fs::write(
        root.path().join("config.toml"),
        "enabled = true\nmods = \"mods\"\n",
    )
    .unwrap();
    root
}

fn gb_registry(api_base: &str, search_base: &str) -> OriginRegistry {
    OriginRegistry::new(vec![Box::new(GameBanana::with_endpoints(
        api_base,
        search_base,
        DEAD,
    ))])
}

fn gb_item(hash: &str, download: &str) -> String {
    format!(
        r#"[[{{"1":{{"_tsDateAdded":1700000000,"_sMd5Checksum":"{hash}","_sDownloadUrl":"{download}"}}}},"https://img.example/shot.png",12,3]]"#
    )
}

#[test]
fn tracked_install_round_trips_through_reopen() {
    let root = game_root();
    let payload = build_zip(&[
        (
            "MyMod/config.toml",
            b"enabled = true\nname = \"My Mod\"\nauthor = \"neru\"\nversion = \"2.1.0\"\n",
        ),
        ("MyMod/rom/song.bin", b"data"),
    ]);
    let (dl_base, dl_server) = stub_http_once(200, "application/zip", &payload);
    let meta = gb_item("abc123", &dl_base);
    let (api_base, api_server) = stub_http_once(200, "application/json", meta.as_bytes());

    let mut manager = ModManager::open(root.path(), None).unwrap();
    let mut registry = gb_registry(&api_base, DEAD);
    let installed = manager
        .install(&mut registry, "gamebanana", 42, "Mod", false)
        .unwrap();
    api_server.join().unwrap();
    dl_server.join().unwrap();

    assert_eq!(installed.name, "My Mod");
    assert_eq!(installed.author, "neru");
    assert_eq!(installed.version.as_ref().unwrap().to_string(), "2.1.0");
    let source = installed.source.clone().unwrap();
    assert_eq!(source.id, 42);
    assert_eq!(source.hash, "abc123");
    assert!(root.path().join("mods/MyMod/rom/song.bin").is_file());
    assert!(root.path().join("mods/MyMod/modinfo.toml").is_file());

    // The fingerprint comparison is served from the process cache; both
    // stubs are gone by now.
    assert!(!manager
        .is_out_of_date(&mut registry, &manager.mods[0])
        .unwrap());

    // A fresh manager rediscovers the mod as tracked from its identity file.
    let reopened = ModManager::open(root.path(), None).unwrap();
    assert_eq!(reopened.mods.len(), 1);
    assert!(reopened.mod_is_installed(42, "gamebanana"));
    assert!(!reopened.mods[0].is_simple());
}

#[test]
fn imported_mods_keep_priority_across_reopen() {
    let root = game_root();
    for name in ["Alpha", "Beta"] {
        let entry = format!("{name}/config.toml");
        let payload = build_zip(&[(entry.as_str(), b"enabled = true\n".as_slice())]);
        fs::write(root.path().join(format!("{name}.zip")), payload).unwrap();
    }

    let mut manager = ModManager::open(root.path(), None).unwrap();
    manager
        .install_from_archive(&root.path().join("Alpha.zip"))
        .unwrap();
    manager
        .install_from_archive(&root.path().join("Beta.zip"))
        .unwrap();
    assert!(manager.mods.iter().all(|entry| entry.is_simple()));

    let beta = manager
        .mods
        .iter()
        .position(|entry| entry.dir_name() == "Beta")
        .unwrap();
    manager.shift_priority(beta, -1).unwrap();

    let reopened = ModManager::open(root.path(), None).unwrap();
    let names: Vec<String> = reopened.mods.iter().map(|entry| entry.dir_name()).collect();
    assert_eq!(names, ["Beta", "Alpha"]);
}

#[test]
fn search_hit_feeds_install() {
    let root = game_root();
    let search_body =
        r#"[{"_idRow":512,"_sName":"Neon Skin","_sModelName":"Skin","_aSubmitter":{"_sName":"piper"}}]"#;
    let (search_base, search_server) =
        stub_http_once(200, "application/json", search_body.as_bytes());

    let payload = build_zip(&[("config.toml", b"enabled = true\nname = \"Neon Skin\"\n")]);
    let (dl_base, dl_server) = stub_http_once(200, "application/zip", &payload);
    let meta = gb_item("fff000", &dl_base);
    let (api_base, api_server) = stub_http_once(200, "application/json", meta.as_bytes());

    let mut registry = gb_registry(&api_base, &search_base);
    let hits = registry.search_all("neon");
    search_server.join().unwrap();
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.origin, "gamebanana");
    assert_eq!(hit.category, "Skin");

    let mut manager = ModManager::open(root.path(), None).unwrap();
    let installed = manager
        .install(&mut registry, hit.origin, hit.id, &hit.category, false)
        .unwrap();
    api_server.join().unwrap();
    dl_server.join().unwrap();

    assert_eq!(installed.name, "Neon Skin");
    let source = installed.source.clone().unwrap();
    assert_eq!(source.id, 512);
    assert_eq!(source.category, "Skin");
    // Root-layout archive lands in a folder named after the id.
    assert!(root.path().join("mods/512/config.toml").is_file());
}
