//! Shared fixtures for `ft` integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// Configuration that skips capability checks.
pub const ALLOW_ALL: &str = "[access]\nallow_all = true\n";

/// A scratch directory holding `.finetunerc`, the database and the spool file.
pub struct CliEnv {
    pub dir: TempDir,
}

impl CliEnv {
    pub fn new() -> Self {
        Self::with_config(ALLOW_ALL)
    }

    pub fn with_config(config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".finetunerc"), config).unwrap();
        Self { dir }
    }

    /// `ft` running in the scratch directory, isolated from the caller's environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("ft").unwrap();
        cmd.current_dir(self.dir.path())
            .env_remove("FINETUNE_CONFIG")
            .env_remove("FINETUNE_DB")
            .env("HOME", self.dir.path());
        cmd
    }

    /// Runs `ft --json <args>` and parses stdout, failing on a non-zero exit.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().arg("--json").args(args).output().unwrap();
        assert!(
            output.status.success(),
            "ft {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    /// Creates a dataset with `train` training and `test` testing entries.
    pub fn seed_dataset(&self, project: &str, train: usize, test: usize) -> (String, Vec<String>) {
        let dataset = self.json(&["dataset", "create", "--project", project, "--name", "support"]);
        let dataset_id = dataset["id"].as_str().unwrap().to_string();

        let mut entry_ids = Vec::new();
        for (split, count) in [("train", train), ("test", test)] {
            if count == 0 {
                continue;
            }
            let entries = self.json(&[
                "dataset",
                "add-entry",
                &dataset_id,
                "--split",
                split,
                "--count",
                &count.to_string(),
            ]);
            entry_ids.extend(
                entries.as_array().unwrap().iter().map(|e| e["id"].as_str().unwrap().to_string()),
            );
        }
        (dataset_id, entry_ids)
    }

    /// Creates a fine tune and returns its ID.
    pub fn create_fine_tune(&self, dataset_id: &str, slug: &str) -> String {
        let created = self.json(&["create", dataset_id, slug, "--base-model", "MISTRAL_7B"]);
        created["fine_tune"]["id"].as_str().unwrap().to_string()
    }

    /// Lines appended by the spool dispatcher so far.
    pub fn spooled(&self) -> Vec<Value> {
        let path = self.dir.path().join("dispatch.jsonl");
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        content.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
    }
}
