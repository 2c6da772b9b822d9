use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::thread;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};

use llama_embedder::native_messaging;

fn frames(requests: &[Value]) -> Vec<u8> {
    let mut buf = Vec::new();
    for req in requests {
        native_messaging::write_json(&mut buf, req).unwrap();
    }
    buf
}

fn run_host(cache: &std::path::Path, requests: &[Value]) -> Vec<Value> {
    run_host_with_env(cache, &[], requests)
}

fn run_host_with_env(cache: &std::path::Path, env: &[(&str, &str)], requests: &[Value]) -> Vec<Value> {
    let mut cmd = Command::cargo_bin("llama_embedder_host").unwrap();
    cmd.env("LLAMA_CACHE_DIR", cache)
        .env_remove("HF_TOKEN")
        .env_remove("HF_ENDPOINT");
    for (key, value) in env {
        cmd.env(key, value);
    }
    let output = cmd
        .env("RUST_LOG", "debug")
        .write_stdin(frames(requests))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let mut reader = Cursor::new(output);
    let mut responses = Vec::new();
    while let Some(payload) = native_messaging::read_frame(&mut reader).unwrap() {
        responses.push(serde_json::from_slice(&payload).unwrap());
    }
    responses
}

#[test]
fn version_flag_prints_version() {
    Command::cargo_bin("llama_embedder_host")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(llama_embedder::config::HOST_VERSION));
}

#[test]
fn hello_health_and_models() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("models")).unwrap();
    std::fs::write(tmp.path().join("models/b.gguf"), b"").unwrap();
    std::fs::write(tmp.path().join("models/a.gguf"), b"").unwrap();
    std::fs::write(tmp.path().join("models/notes.txt"), b"").unwrap();

    let responses = run_host(
        tmp.path(),
        &[
            json!({ "id": "1", "method": "hello", "params": { "clientVersion": "1.2.3" } }),
            json!({ "id": "2", "method": "health" }),
            json!({ "id": "3", "method": "models" }),
        ],
    );

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["id"], "1");
    assert_eq!(responses[0]["result"]["type"], "hello-response");
    assert_eq!(responses[1]["result"]["status"], "running");
    assert_eq!(responses[2]["result"]["models"], json!(["a.gguf", "b.gguf"]));

    assert!(tmp.path().join("logs").is_dir());
}

#[test]
fn errors_are_reported_per_request() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_string_lossy().to_string();
    let missing = tmp.path().join("nope.gguf").to_string_lossy().to_string();

    let responses = run_host(
        tmp.path(),
        &[
            json!({ "id": "u", "method": "frobnicate" }),
            json!({ "id": "d", "method": "embed", "params": { "model": dir, "texts": ["hi"] } }),
            json!({ "id": "m", "method": "embed", "params": { "model": missing, "texts": ["hi"] } }),
            json!({ "id": "h", "method": "health" }),
        ],
    );

    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0]["error"], "Unknown method: frobnicate");

    assert_eq!(responses[1]["kind"], "configuration");
    assert!(responses[1]["error"].as_str().unwrap().contains("ambiguous model path"));

    assert_eq!(responses[2]["id"], "m");
    assert_eq!(responses[2]["kind"], "load");

    // The loop keeps going after failures.
    assert_eq!(responses[3]["result"]["status"], "running");
}

#[test]
fn shutdown_stops_the_loop() {
    let tmp = tempfile::tempdir().unwrap();
    let responses = run_host(
        tmp.path(),
        &[
            json!({ "id": "s", "method": "shutdown" }),
            json!({ "id": "after", "method": "health" }),
        ],
    );
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["result"]["ok"], true);
}

#[test]
fn empty_texts_for_uncached_remote_model_is_input_error() {
    let tmp = tempfile::tempdir().unwrap();
    let responses = run_host_with_env(
        tmp.path(),
        &[("HF_ENDPOINT", "http://127.0.0.1:9")],
        &[json!({ "id": "e", "method": "embed", "params": { "model": "m.gguf", "repository": "org/repo", "texts": [] } })],
    );
    assert_eq!(responses[0]["kind"], "input");
    assert_eq!(responses[0]["error"], "texts are empty");
    assert!(!tmp.path().join("models/m.gguf").exists());
}

#[test]
fn download_uses_endpoint_and_token_from_environment() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let body = b"GGUF weights";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
        stream.write_all(body).unwrap();
        String::from_utf8_lossy(&head).into_owned()
    });

    let tmp = tempfile::tempdir().unwrap();
    let responses = run_host_with_env(
        tmp.path(),
        &[("HF_ENDPOINT", endpoint.as_str()), ("HF_TOKEN", "hf_from_env")],
        &[json!({ "id": "dl", "method": "download", "params": { "repository": "org/repo", "file": "m.gguf" } })],
    );
    let head = server.join().unwrap();

    assert!(head.starts_with("GET /org/repo/resolve/main/m.gguf "), "{head}");
    assert!(head.to_ascii_lowercase().contains("authorization: bearer hf_from_env"), "{head}");
    assert_eq!(responses[0]["result"]["downloaded"], true);
    assert_eq!(std::fs::read(tmp.path().join("models/m.gguf")).unwrap(), b"GGUF weights");
}
