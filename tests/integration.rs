use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const VAULT_SOURCE: &str = "\
pragma solidity ^0.8.0;

contract Vault {
    mapping(address => uint256) public balances;

    function deposit() external payable {
        balances[msg.sender] += msg.value;
    }

    function withdraw(uint256 amount) external {
        require(balances[msg.sender] >= amount, \"insufficient\");
        (bool ok, ) = msg.sender.call{value: amount}(\"\");
        require(ok);
        balances[msg.sender] -= amount;
    }
}
";

const KNOWLEDGE_JSON: &str = r#"[
  {
    "content": "Reentrancy: external calls before state updates let attackers re-enter withdraw.",
    "category": "Security",
    "pattern_type": "reentrancy",
    "severity": 5,
    "references": ["https://swcregistry.io/docs/SWC-107"]
  },
  {
    "content": "Use the checks-effects-interactions pattern when transferring ether.",
    "category": "Best Practice",
    "pattern_type": "checks-effects-interactions",
    "severity": 3
  },
  {
    "content": "ERC-20 transfer should return a boolean success value.",
    "category": "Standard",
    "pattern_type": "erc20",
    "standard": "ERC-20",
    "severity": 1
  }
]"#;

fn sca_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sca");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("Vault.sol"), VAULT_SOURCE).unwrap();
    fs::write(files_dir.join("knowledge.json"), KNOWLEDGE_JSON).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/sca.sqlite"

[chunking]
chunk_size = 200
chunk_overlap = 40

[embedding]
provider = "hashing"
dims = 128

[llm]
url = "http://127.0.0.1:9"

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );

    let config_path = config_dir.join("sca.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn files(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

fn run_sca(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sca_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("ANTHROPIC_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sca binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn add_vault(config_path: &Path) {
    let file = files(config_path).join("Vault.sol");
    let (stdout, stderr, success) = run_sca(
        config_path,
        &[
            "add-contract",
            file.to_str().unwrap(),
            "--name",
            "Vault",
            "--address",
            "0xabc",
            "--network",
            "sepolia",
        ],
    );
    assert!(success, "add-contract failed: stdout={}, stderr={}", stdout, stderr);
}

fn add_knowledge(config_path: &Path) {
    let file = files(config_path).join("knowledge.json");
    let (stdout, stderr, success) =
        run_sca(config_path, &["add-knowledge", file.to_str().unwrap()]);
    assert!(success, "add-knowledge failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Added 3 knowledge item(s)"), "got: {}", stdout);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sca(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/sca.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_sca(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_sca(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_add_contract_then_stats() {
    let (_tmp, config_path) = setup_test_env();

    run_sca(&config_path, &["init"]);
    add_vault(&config_path);

    let (stdout, stderr, success) = run_sca(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("smart_contract_analysis"));
    assert!(stdout.contains("Vault"), "Expected Vault summary, got: {}", stdout);
}

#[test]
fn test_add_contract_twice_merges_into_one_summary() {
    let (_tmp, config_path) = setup_test_env();

    add_vault(&config_path);
    add_vault(&config_path);

    let (stdout, _, success) = run_sca(&config_path, &["stats"]);
    assert!(success);
    assert_eq!(
        stdout.lines().filter(|l| l.trim_start().starts_with("Vault")).count(),
        1,
        "Expected one Vault row, got: {}",
        stdout
    );
}

#[test]
fn test_add_contract_missing_file_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_sca(
        &config_path,
        &["add-contract", "/nonexistent/Lease.txt", "--name", "Lease"],
    );
    assert!(!success);
    assert!(stderr.contains("Failed to read"), "got: {}", stderr);
}

#[test]
fn test_add_knowledge_then_stats() {
    let (_tmp, config_path) = setup_test_env();

    add_knowledge(&config_path);

    let (stdout, stderr, success) = run_sca(&config_path, &["knowledge-stats"]);
    assert!(success, "knowledge-stats failed: {}", stderr);
    assert!(stdout.contains("3 items"), "got: {}", stdout);
    assert!(stdout.contains("Security"));
    assert!(stdout.contains("Best Practice"));
    assert!(stdout.contains("Standard"));
}

#[test]
fn test_search_knowledge_with_filters() {
    let (_tmp, config_path) = setup_test_env();

    add_knowledge(&config_path);

    let (stdout, stderr, success) = run_sca(
        &config_path,
        &["search-knowledge", "reentrancy attack", "--min-severity", "4"],
    );
    assert!(success, "search-knowledge failed: {}", stderr);
    assert!(stdout.contains("reentrancy"), "got: {}", stdout);
    assert!(!stdout.contains("erc20"), "severity filter ignored: {}", stdout);
    assert!(
        stdout.contains("see: https://swcregistry.io/docs/SWC-107"),
        "references not listed: {}",
        stdout
    );

    let (stdout, _, success) = run_sca(
        &config_path,
        &["search-knowledge", "token", "--standard", "ERC-20"],
    );
    assert!(success);
    assert!(stdout.contains("erc20"));
    assert!(!stdout.contains("reentrancy"));
}

#[test]
fn test_search_knowledge_rejects_min_severity_above_five() {
    let (_tmp, config_path) = setup_test_env();

    add_knowledge(&config_path);

    let (_, stderr, success) = run_sca(
        &config_path,
        &["search-knowledge", "reentrancy", "--min-severity", "6"],
    );
    assert!(!success);
    assert!(stderr.contains("min_severity"), "got: {}", stderr);
}

#[test]
fn test_search_knowledge_empty_collection() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_sca(&config_path, &["search-knowledge", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_reset_contracts_keeps_knowledge() {
    let (_tmp, config_path) = setup_test_env();

    add_vault(&config_path);
    add_knowledge(&config_path);

    let (stdout, _, success) = run_sca(&config_path, &["reset", "contracts"]);
    assert!(success);
    assert!(stdout.contains("reset successfully"));

    let (stdout, _, _) = run_sca(&config_path, &["stats"]);
    assert!(!stdout.contains("Contracts:"), "contracts survived reset: {}", stdout);

    let (stdout, _, _) = run_sca(&config_path, &["knowledge-stats"]);
    assert!(stdout.contains("3 items"));
}

#[test]
fn test_query_without_api_key_fails() {
    let (_tmp, config_path) = setup_test_env();

    add_vault(&config_path);

    let (_, stderr, success) = run_sca(&config_path, &["query", "Who can withdraw?"]);
    assert!(!success);
    assert!(stderr.contains("ANTHROPIC_API_KEY"), "got: {}", stderr);
}

#[test]
fn test_query_empty_question_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_sca(&config_path, &["query", "   "]);
    assert!(!success);
    assert!(stderr.contains("question"), "got: {}", stderr);
}

#[test]
fn test_analyze_unknown_contract_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_sca(&config_path, &["analyze", "--contract", "Missing"]);
    assert!(!success);
    assert!(stderr.contains("Missing"), "got: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(
        &config_path,
        "[db]\npath = \"x.sqlite\"\n\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
    )
    .unwrap();

    let (_, stderr, success) = run_sca(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"), "got: {}", stderr);
}

#[test]
fn test_completions_need_no_config() {
    let output = Command::new(sca_binary())
        .args(["--config", "/nonexistent/sca.toml", "completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("sca"));
}
