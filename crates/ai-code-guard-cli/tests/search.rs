use assert_cmd::Command;
use once_cell::sync::Lazy;
use predicates::prelude::*;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const ACT_TEXT: &str = "TITLE II\nPROHIBITED ARTIFICIAL INTELLIGENCE PRACTICES\n\nArticle 5\nThe placing on the market of AI systems that deploy subliminal techniques is prohibited.\n\nArticle 6\nClassification rules for high-risk AI systems used in employment and recruitment.\n\nArticle 50\nTransparency obligations for chatbots interacting with natural persons.";

fn reset_env() {
    for key in [
        "AI_CODE_GUARD_PROVIDER",
        "AI_CODE_GUARD_DATA_DIR",
        "AI_CODE_GUARD_TIMEOUT",
        "AI_CODE_GUARD_MAX_RETRIES",
        "USE_AZURE",
        "OPENAI_API_KEY",
        "MODEL_NAME",
        "EMBEDDING_MODEL",
    ] {
        env::remove_var(key);
    }
}

fn seed_data_dir(dir: &Path) {
    fs::write(dir.join("eu_ai_act.txt"), ACT_TEXT).unwrap();
}

#[test]
fn search_with_noop_provider() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();
    let data = tempfile::tempdir().unwrap();
    seed_data_dir(data.path());

    let mut cmd = Command::cargo_bin("ai-code-guard").unwrap();
    cmd.args([
        "--provider",
        "noop",
        "--data-dir",
        data.path().to_str().unwrap(),
        "search",
        "recruitment high-risk employment",
        "-k",
        "2",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("match(es) for"))
    .stdout(predicate::str::contains("Section 1"));

    assert!(data.path().join("vectorstores").join("eu_ai_act.json").exists());
}

#[test]
fn search_emits_json() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();
    let data = tempfile::tempdir().unwrap();
    seed_data_dir(data.path());

    let output = Command::cargo_bin("ai-code-guard")
        .unwrap()
        .args([
            "--provider",
            "noop",
            "--data-dir",
            data.path().to_str().unwrap(),
            "search",
            "chatbot transparency",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let matches: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let matches = matches.as_array().unwrap();
    assert!(!matches.is_empty());
    assert!(matches.len() <= 5);
    assert_eq!(matches[0]["chunk"]["source"], "EU AI Act");
}

#[test]
fn search_with_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();
    let data = tempfile::tempdir().unwrap();
    seed_data_dir(data.path());
    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    fs::write(
        file.path(),
        format!(
            "data_dir = \"{}\"\n\n[llm]\nprovider = \"noop\"\n",
            data.path().display()
        ),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("ai-code-guard").unwrap();
    cmd.args([
        "--config",
        file.path().to_str().unwrap(),
        "search",
        "prohibited subliminal techniques",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Section 1"));
}

#[test]
fn init_builds_index() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();
    let data = tempfile::tempdir().unwrap();
    seed_data_dir(data.path());

    let mut cmd = Command::cargo_bin("ai-code-guard").unwrap();
    cmd.env("AI_CODE_GUARD_PROVIDER", "noop")
        .args(["--data-dir", data.path().to_str().unwrap(), "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EU AI Act index ready"));

    assert!(data.path().join("repos").is_dir());
    assert!(data.path().join("vectorstores").join("eu_ai_act.json").exists());
}

#[test]
fn empty_corpus_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();
    let data = tempfile::tempdir().unwrap();
    fs::write(data.path().join("eu_ai_act.txt"), "   \n").unwrap();

    let mut cmd = Command::cargo_bin("ai-code-guard").unwrap();
    cmd.args([
        "--provider",
        "noop",
        "--data-dir",
        data.path().to_str().unwrap(),
        "search",
        "anything",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("is empty"));
}
