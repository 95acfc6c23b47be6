use crate::include::{FlattenedShader, ShaderError, flatten};
use latinium_common::{ProgramPaths, ShaderStage};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, Instant};

/// Flattened sources of both stages of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub vertex: FlattenedShader,
    pub fragment: FlattenedShader,
    /// SHA-256 over both flattened stages, hex encoded.
    pub digest: String,
}

impl ProgramSource {
    /// Flatten both stages of `paths`. Fails on the first stage that fails.
    pub fn load(paths: &ProgramPaths) -> Result<Self, ShaderError> {
        let vertex = flatten(&paths.vertex)?;
        let fragment = flatten(&paths.fragment)?;
        let digest = program_digest(vertex.source(), fragment.source());
        Ok(Self {
            vertex,
            fragment,
            digest,
        })
    }

    pub fn stage(&self, stage: ShaderStage) -> &FlattenedShader {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    /// Every file either stage was assembled from, sorted and deduplicated.
    pub fn dependencies(&self) -> Vec<&Path> {
        let mut deps = self.vertex.dependencies();
        deps.extend(self.fragment.dependencies());
        deps.sort();
        deps.dedup();
        deps
    }
}

/// Result of one reload attempt.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// Sources changed; the new program is now the last good one.
    Updated(ProgramSource),
    /// Flattened sources are identical to the last good program.
    Unchanged,
    /// Flattening failed; the last good program is kept.
    Failed(ShaderError),
}

/// Re-flattens a program on demand and remembers the last good result.
pub struct ProgramReloader {
    paths: ProgramPaths,
    last_good: Option<ProgramSource>,
    last_error: Option<String>,
    reloads: u64,
    failures: u64,
    last_duration: Duration,
}

impl ProgramReloader {
    pub fn new(paths: ProgramPaths) -> Self {
        Self {
            paths,
            last_good: None,
            last_error: None,
            reloads: 0,
            failures: 0,
            last_duration: Duration::ZERO,
        }
    }

    pub fn paths(&self) -> &ProgramPaths {
        &self.paths
    }

    /// Flatten both stages again and compare against the last good program.
    pub fn reload(&mut self) -> ReloadOutcome {
        let _span = tracing::info_span!("reload", vertex = %self.paths.vertex.display()).entered();
        let start = Instant::now();
        let result = ProgramSource::load(&self.paths);
        self.last_duration = start.elapsed();

        match result {
            Ok(program) => {
                self.last_error = None;
                if self
                    .last_good
                    .as_ref()
                    .is_some_and(|prev| prev.digest == program.digest)
                {
                    tracing::debug!("program unchanged");
                    return ReloadOutcome::Unchanged;
                }
                self.reloads += 1;
                tracing::info!(
                    digest = &program.digest[..12],
                    elapsed = ?self.last_duration,
                    "program reloaded"
                );
                self.last_good = Some(program.clone());
                ReloadOutcome::Updated(program)
            }
            Err(e) => {
                self.failures += 1;
                tracing::error!("shader reload failed, keeping last good program: {e}");
                self.last_error = Some(e.to_string());
                ReloadOutcome::Failed(e)
            }
        }
    }

    /// The most recent program that flattened successfully.
    pub fn last_good(&self) -> Option<&ProgramSource> {
        self.last_good.as_ref()
    }

    /// Error text of the latest attempt, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of reloads that produced a new program.
    pub fn reload_count(&self) -> u64 {
        self.reloads
    }

    pub fn failure_count(&self) -> u64 {
        self.failures
    }

    /// Wall time of the latest reload attempt.
    pub fn last_duration(&self) -> Duration {
        self.last_duration
    }
}

fn program_digest(vertex: &str, fragment: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((vertex.len() as u64).to_le_bytes());
    hasher.update(vertex.as_bytes());
    hasher.update(fragment.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn pack(dir: &Path) -> ProgramPaths {
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/common.glsl"), "uniform float frameTimeCounter;").unwrap();
        fs::write(
            dir.join("gbuffers_textured.vsh"),
            "#version 120\n#include \"lib/common.glsl\"\nvoid main() {}",
        )
        .unwrap();
        fs::write(
            dir.join("gbuffers_textured.fsh"),
            "#version 120\n#include \"/lib/common.glsl\"\nvoid main() {}",
        )
        .unwrap();
        ProgramPaths::named(dir, "gbuffers_textured")
    }

    #[test]
    fn first_reload_updates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reloader = ProgramReloader::new(pack(tmp.path()));

        let ReloadOutcome::Updated(program) = reloader.reload() else {
            panic!("expected first reload to update");
        };
        assert!(program.vertex.source().contains("frameTimeCounter"));
        assert_eq!(program.digest.len(), 64);
        assert_eq!(program.dependencies().len(), 3);
        assert_eq!(reloader.reload_count(), 1);
        assert!(reloader.last_good().is_some());
    }

    #[test]
    fn identical_content_is_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = pack(tmp.path());
        let mut reloader = ProgramReloader::new(paths.clone());
        reloader.reload();

        // Rewriting the same bytes must not produce a new program.
        let same = fs::read_to_string(&paths.vertex).unwrap();
        fs::write(&paths.vertex, same).unwrap();
        assert!(matches!(reloader.reload(), ReloadOutcome::Unchanged));
        assert_eq!(reloader.reload_count(), 1);
    }

    #[test]
    fn include_edit_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reloader = ProgramReloader::new(pack(tmp.path()));
        reloader.reload();

        fs::write(tmp.path().join("lib/common.glsl"), "uniform float viewWidth;").unwrap();
        let ReloadOutcome::Updated(program) = reloader.reload() else {
            panic!("expected include edit to update");
        };
        assert!(program.fragment.source().contains("viewWidth"));
        assert_eq!(reloader.reload_count(), 2);
    }

    #[test]
    fn failure_keeps_last_good() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = pack(tmp.path());
        let mut reloader = ProgramReloader::new(paths.clone());
        reloader.reload();
        let good_digest = reloader.last_good().unwrap().digest.clone();

        fs::write(&paths.fragment, "#include \"missing.glsl\"").unwrap();
        assert!(matches!(
            reloader.reload(),
            ReloadOutcome::Failed(ShaderError::IncludeNotFound { .. })
        ));
        assert_eq!(reloader.failure_count(), 1);
        assert!(reloader.last_error().unwrap().contains("missing.glsl"));
        assert_eq!(reloader.last_good().unwrap().digest, good_digest);

        fs::write(&paths.fragment, "void main() {}").unwrap();
        assert!(matches!(reloader.reload(), ReloadOutcome::Updated(_)));
        assert!(reloader.last_error().is_none());
    }

    #[test]
    fn digest_separates_stages() {
        assert_ne!(program_digest("ab", "c"), program_digest("a", "bc"));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let digest = program_digest("void main() {}", "");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_eq!(digest, program_digest("void main() {}", ""));
    }
}
