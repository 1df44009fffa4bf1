use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::model::SecurityTest;

#[derive(Debug, Deserialize)]
struct SecurityTestSet {
    security_tests: Vec<SecurityTest>,
}

/// 从目录加载 YAML 安全测试定义：单个 SecurityTest 或 `security_tests:` 列表
pub fn load_security_tests_from_dir<P: AsRef<Path>>(path: P) -> Result<Vec<SecurityTest>> {
    let mut tests = Vec::new();

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_yaml = path
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read securityTest file: {:?}", path))?;

        // Try a set first, then a single entry
        if let Ok(set) = serde_yaml::from_str::<SecurityTestSet>(&content) {
            tests.extend(set.security_tests);
        } else if let Ok(test) = serde_yaml::from_str::<SecurityTest>(&content) {
            tests.push(test);
        } else {
            tracing::warn!("Failed to parse securityTest file: {:?}", path);
        }
    }

    Ok(tests)
}
