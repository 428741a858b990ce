//! Configuration loading and parsing.
//!
//! Parse `quill.toml` (or an override path provided by the binary),
//! extracting the scheduler, module-root, and repository settings. Unknown
//! fields are ignored (TOML deserialization tolerance) so configurations
//! survive forward evolution without warnings. A missing or unparsable
//! file degrades to defaults; the CLI's own flags override file values.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::{fs, path::PathBuf};
use tracing::info;

/// Host facts the effective configuration is clamped against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigContext {
    pub available_parallelism: usize,
}

impl ConfigContext {
    pub fn detect() -> ConfigContext {
        ConfigContext {
            available_parallelism: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(2),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchedulerConfig {
    /// Worker threads driving fibers; 0 means one per core.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RepositoryConfig {
    /// Directory holding binary module repositories. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModulesConfig {
    /// Module root bindings: root name → directory.
    #[serde(default)]
    pub roots: BTreeMap<String, PathBuf>,
    /// Module rename rules file.
    #[serde(default)]
    pub renames: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file string, when one was read.
    pub raw: Option<String>,
    /// Parsed (or default) data.
    pub file: ConfigFile,
    /// Clamped worker count; computed by `apply_context`.
    pub effective_threads: usize,
}

/// Best-effort config path following platform conventions: a local
/// `quill.toml` wins, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("quill.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("quill").join("quill.toml");
    }
    PathBuf::from("quill.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Config {
                raw: Some(content),
                file,
                effective_threads: 0,
            }),
            Err(_e) => {
                // On parse error fall back to defaults rather than abort.
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

impl Config {
    /// Clamp the configured thread count against the host: 0 means "one
    /// per core", and anything above twice the core count is capped.
    pub fn apply_context(&mut self, context: ConfigContext) -> usize {
        let raw = self.file.scheduler.threads;
        let cores = context.available_parallelism.max(1);
        let effective = if raw == 0 { cores } else { raw.min(cores * 2) };
        if effective != raw && raw != 0 {
            info!(
                target: "config",
                raw,
                effective,
                cores,
                "scheduler_threads_clamped"
            );
        }
        self.effective_threads = effective;
        effective
    }

    /// The repository directory, defaulting to the platform data dir.
    pub fn repository_directory(&self) -> PathBuf {
        if let Some(directory) = &self.file.repository.directory {
            return directory.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join("quill").join("repositories"))
            .unwrap_or_else(|| PathBuf::from("repositories"))
    }

    /// Merge CLI-provided root bindings (`name=path;name2=path2`) over the
    /// file's.
    pub fn merge_roots(&mut self, spec: &str) {
        for binding in spec.split(';').filter(|binding| !binding.is_empty()) {
            match binding.split_once('=') {
                Some((name, path)) => {
                    self.file
                        .modules
                        .roots
                        .insert(name.to_owned(), PathBuf::from(path));
                }
                None => {
                    info!(target: "config", binding, "ignoring malformed module-root binding");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_scheduler_and_roots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[scheduler]\nthreads = 3\n\n[modules.roots]\ncore = \"/tmp/core\"\n"
        )
        .unwrap();
        let config = load_from(Some(path)).unwrap();
        assert_eq!(config.file.scheduler.threads, 3);
        assert_eq!(
            config.file.modules.roots.get("core"),
            Some(&PathBuf::from("/tmp/core"))
        );
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.toml");
        fs::write(&path, "[scheduler]\nthreads = 2\nfancy = true\n").unwrap();
        let config = load_from(Some(path)).unwrap();
        assert_eq!(config.file.scheduler.threads, 2);
    }

    #[test]
    fn missing_file_degrades_to_defaults() {
        let config = load_from(Some(PathBuf::from("/nonexistent/quill.toml"))).unwrap();
        assert_eq!(config.file.scheduler.threads, 0);
        assert!(config.raw.is_none());
    }

    #[test]
    fn thread_count_clamps_to_the_host() {
        let mut config = Config::default();
        config.file.scheduler.threads = 10_000;
        let effective = config.apply_context(ConfigContext {
            available_parallelism: 4,
        });
        assert_eq!(effective, 8);
        config.file.scheduler.threads = 0;
        assert_eq!(
            config.apply_context(ConfigContext {
                available_parallelism: 4
            }),
            4
        );
    }

    #[test]
    fn cli_roots_override_file_roots() {
        let mut config = Config::default();
        config
            .file
            .modules
            .roots
            .insert("core".into(), PathBuf::from("/old"));
        config.merge_roots("core=/new;extra=/more");
        assert_eq!(
            config.file.modules.roots.get("core"),
            Some(&PathBuf::from("/new"))
        );
        assert_eq!(
            config.file.modules.roots.get("extra"),
            Some(&PathBuf::from("/more"))
        );
    }
}
