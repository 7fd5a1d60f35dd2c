// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/mxf/config.yaml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/mxf/config.yaml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".mxf/config.yaml"));
    paths.push(PathBuf::from("mxf.yaml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(&merged, serde_yaml::Value::Mapping(m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Environment variables override file configuration.
///
/// Recognized: `MXF_BIND`, `MXF_AGENT_PORT`, `MXF_DEFAULT_MODEL`,
/// `MXF_MCP_WORKDIR`. Provider API keys are resolved lazily through
/// `ProviderConfig::resolve_api_key`, not here.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(bind) = std::env::var("MXF_BIND") {
        config.server.bind = bind;
    }
    if let Ok(port) = std::env::var("MXF_AGENT_PORT") {
        if let Ok(port) = port.parse() {
            config.server.agent_port = port;
        }
    }
    if let Ok(model) = std::env::var("MXF_DEFAULT_MODEL") {
        config.server.default_model = model;
    }
    if let Ok(dir) = std::env::var("MXF_MCP_WORKDIR") {
        config.server.mcp_workdir = Some(dir);
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("server:\n  bind: 127.0.0.1:4800\n  agent_port: 4801");
        let src = val("server:\n  agent_port: 9000");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["server"]["bind"].as_str(), Some("127.0.0.1:4800"));
        assert_eq!(dst["server"]["agent_port"].as_i64(), Some(9000));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/mxf_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "server:\n  bind: 0.0.0.0:5000\nruntime:\n  circuit_breaker_trip_count: 5"
        )
        .unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:5000");
        assert_eq!(cfg.runtime.circuit_breaker_trip_count, 5);
    }

    #[test]
    fn load_parses_provider_map() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "providers:\n  local:\n    kind: openai\n    base_url: http://localhost:11434/v1"
        )
        .unwrap();
        let cfg = load(Some(f.path())).unwrap();
        let local = cfg.providers.get("local").unwrap();
        assert_eq!(local.kind, "openai");
        assert_eq!(local.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(local.concurrency, 4);
    }
}
