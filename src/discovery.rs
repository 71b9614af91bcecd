use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::types::{FileCandidate, Source};

/// Glob patterns relative to a source's root directory.
pub fn patterns_for(source: Source) -> &'static [&'static str] {
    match source {
        Source::Claude => &["projects/*/*.jsonl"],
        Source::Codex => &["sessions/????/??/??/rollout-*.jsonl"],
        Source::Gemini => &["tmp/*/chats/session-*.json"],
        Source::OpenCode => &["storage/session/*/*.json"],
        Source::Droid => &["sessions/*.jsonl"],
        Source::Copilot => &["session-state/*.jsonl", "session-state/*/events.jsonl"],
    }
}

pub fn default_root(source: Source, home: &Path) -> PathBuf {
    match source {
        Source::Claude => home.join(".claude"),
        Source::Codex => home.join(".codex"),
        Source::Gemini => home.join(".gemini"),
        Source::OpenCode => home.join(".local").join("share").join("opencode"),
        Source::Droid => home.join(".factory"),
        Source::Copilot => home.join(".copilot"),
    }
}

/// Expand a leading `~` against `home`.
pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        home.to_path_buf()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    pub source: Source,
    pub root: PathBuf,
}

impl SourceRoot {
    fn glob_patterns(&self) -> Vec<String> {
        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let root = root.trim_end_matches(['/', '\\']);
        patterns_for(self.source)
            .iter()
            .map(|pattern| format!("{root}/{pattern}"))
            .collect()
    }
}

/// Finds session files for each source under its root directory.
#[derive(Debug, Clone)]
pub struct FileDiscoverer {
    roots: Vec<SourceRoot>,
}

impl FileDiscoverer {
    pub fn new(roots: Vec<SourceRoot>) -> Self {
        Self { roots }
    }

    /// Roots under `home`. `codex_home` (the `CODEX_HOME` variable) replaces
    /// the Codex root; explicit `overrides` win over both.
    pub fn from_home(
        home: &Path,
        codex_home: Option<PathBuf>,
        overrides: &HashMap<Source, PathBuf>,
    ) -> Self {
        let roots = Source::ALL
            .iter()
            .map(|&source| {
                let root = match (overrides.get(&source), source) {
                    (Some(root), _) => root.clone(),
                    (None, Source::Codex) => codex_home
                        .clone()
                        .unwrap_or_else(|| default_root(source, home)),
                    (None, _) => default_root(source, home),
                };
                SourceRoot { source, root }
            })
            .collect();
        Self::new(roots)
    }

    /// Roots for the current user, honoring `CODEX_HOME`.
    pub fn from_environment(overrides: &HashMap<Source, PathBuf>) -> Self {
        let home = dirs::home_dir().unwrap_or_default();
        let codex_home = std::env::var_os("CODEX_HOME")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::from_home(&home, codex_home, overrides)
    }

    /// Path-sorted, deduplicated candidates for `sources` (all when `None`).
    /// Missing roots and glob failures contribute nothing.
    pub fn discover(&self, sources: Option<&[Source]>) -> Vec<FileCandidate> {
        let mut found: BTreeMap<PathBuf, FileCandidate> = BTreeMap::new();

        for root in &self.roots {
            if sources.is_some_and(|wanted| !wanted.contains(&root.source)) {
                continue;
            }
            if !root.root.is_dir() {
                debug!(source = %root.source, root = %root.root.display(), "source root not present");
                continue;
            }

            for pattern in root.glob_patterns() {
                let entries = match glob::glob(&pattern) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(%pattern, error = %e, "invalid discovery pattern");
                        continue;
                    }
                };

                for entry in entries {
                    let path = match entry {
                        Ok(path) => path,
                        Err(e) => {
                            debug!(error = %e, "unreadable path during discovery");
                            continue;
                        }
                    };
                    if let Some(candidate) = candidate_for(root.source, path) {
                        found.insert(candidate.path.clone(), candidate);
                    }
                }
            }
        }

        found.into_values().collect()
    }
}

fn candidate_for(source: Source, path: PathBuf) -> Option<FileCandidate> {
    let metadata = std::fs::metadata(&path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let mtime_ms = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0);

    Some(FileCandidate {
        path,
        source,
        mtime_ms,
        size: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn populate(home: &Path) {
        touch(&home.join(".claude/projects/-home-me-app/a.jsonl"), "{}\n");
        touch(
            &home.join(".codex/sessions/2025/09/18/rollout-2025-09-18T00-16-27-243232f1-a7ab-44e6-b2c3-045b673746ea.jsonl"),
            "{}\n",
        );
        touch(&home.join(".gemini/tmp/abc123/chats/session-1.json"), "{}");
        touch(&home.join(".local/share/opencode/storage/session/proj/ses_1.json"), "{}");
        touch(&home.join(".factory/sessions/s1.jsonl"), "{}\n");
        touch(&home.join(".factory/sessions/s1.settings.json"), "{}");
        touch(&home.join(".copilot/session-state/c1.jsonl"), "{}\n");
    }

    #[test]
    fn discovers_every_source_sorted_by_path() {
        let home = tempdir().unwrap();
        populate(home.path());

        let discoverer = FileDiscoverer::from_home(home.path(), None, &HashMap::new());
        let found = discoverer.discover(None);

        let sources: Vec<Source> = found.iter().map(|c| c.source).collect();
        assert_eq!(found.len(), 6);
        for source in Source::ALL {
            assert!(sources.contains(&source), "missing {source}");
        }

        let paths: Vec<&PathBuf> = found.iter().map(|c| &c.path).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);

        // Droid settings companions are not sessions
        assert!(!found.iter().any(|c| c.path.ends_with("s1.settings.json")));
        assert!(found.iter().all(|c| c.size > 0 && c.mtime_ms > 0));
    }

    #[test]
    fn codex_pattern_requires_date_layout() {
        let home = tempdir().unwrap();
        touch(&home.path().join(".codex/sessions/rollout-loose.jsonl"), "{}\n");
        touch(&home.path().join(".codex/sessions/2025/09/18/other.jsonl"), "{}\n");

        let discoverer = FileDiscoverer::from_home(home.path(), None, &HashMap::new());
        assert!(discoverer.discover(Some(&[Source::Codex])).is_empty());
    }

    #[test]
    fn source_filter_limits_results() {
        let home = tempdir().unwrap();
        populate(home.path());

        let discoverer = FileDiscoverer::from_home(home.path(), None, &HashMap::new());
        let found = discoverer.discover(Some(&[Source::Gemini, Source::Droid]));
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| matches!(c.source, Source::Gemini | Source::Droid)));
    }

    #[test]
    fn missing_roots_yield_nothing() {
        let home = tempdir().unwrap();
        let discoverer = FileDiscoverer::from_home(home.path(), None, &HashMap::new());
        assert!(discoverer.discover(None).is_empty());
    }

    #[test]
    fn codex_home_replaces_default_root() {
        let home = tempdir().unwrap();
        let codex_home = tempdir().unwrap();
        populate(home.path());
        touch(
            &codex_home.path().join("sessions/2025/01/02/rollout-x.jsonl"),
            "{}\n",
        );

        let discoverer = FileDiscoverer::from_home(
            home.path(),
            Some(codex_home.path().to_path_buf()),
            &HashMap::new(),
        );
        let found = discoverer.discover(Some(&[Source::Codex]));
        assert_eq!(found.len(), 1);
        assert!(found[0].path.starts_with(codex_home.path()));
    }

    #[test]
    fn root_with_glob_metacharacters_is_escaped() {
        let base = tempdir().unwrap();
        let root = base.path().join("weird [dir]");
        touch(&root.join("projects/p/x.jsonl"), "{}\n");

        let mut overrides = HashMap::new();
        overrides.insert(Source::Claude, root.clone());
        let discoverer = FileDiscoverer::from_home(base.path(), None, &overrides);

        let found = discoverer.discover(Some(&[Source::Claude]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, root.join("projects/p/x.jsonl"));
    }

    #[test]
    fn tilde_expansion() {
        let home = Path::new("/home/me");
        assert_eq!(expand_tilde("~", home), PathBuf::from("/home/me"));
        assert_eq!(expand_tilde("~/x/y", home), PathBuf::from("/home/me/x/y"));
        assert_eq!(expand_tilde("/abs", home), PathBuf::from("/abs"));
    }
}
