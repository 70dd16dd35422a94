//! Title-scoped cache state and configuration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Overrides the cache root directory.
pub const CACHE_DIR_ENV: &str = "LATTE_PIPELINE_CACHE_DIR";
/// Disables the on-disk pipeline archive when truthy.
pub const DISABLE_ARCHIVE_ENV: &str = "LATTE_DISABLE_PIPELINE_ARCHIVE";

fn truthy(raw: Option<String>) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCacheConfig {
    /// Directory containing `shaderCache/`.
    pub cache_root: PathBuf,
    pub archive_enabled: bool,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("."),
            archive_enabled: true,
        }
    }
}

impl PipelineCacheConfig {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Defaults, overridden by `LATTE_PIPELINE_CACHE_DIR` and `LATTE_DISABLE_PIPELINE_ARCHIVE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`PipelineCacheConfig::from_env`] with variables read through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.cache_root = PathBuf::from(dir);
            }
        }
        if truthy(lookup(DISABLE_ARCHIVE_ENV)) {
            config.archive_enabled = false;
        }
        config
    }

    /// On-disk archive of `title_id`.
    pub fn archive_path(&self, title_id: u64) -> PathBuf {
        archive_path_in(&self.cache_root, title_id)
    }
}

fn archive_path_in(root: &Path, title_id: u64) -> PathBuf {
    root.join("shaderCache")
        .join("precompiled")
        .join(format!("{title_id:016x}_wgsl_pipelines.bin"))
}

/// Title-scoped state owned by a pipeline cache.
#[derive(Debug, Default)]
pub struct SessionContext {
    config: PipelineCacheConfig,
    title_id: Option<u64>,
    compiled_shaders: AtomicU64,
}

impl SessionContext {
    pub fn new(config: PipelineCacheConfig) -> Self {
        Self {
            config,
            title_id: None,
            compiled_shaders: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PipelineCacheConfig {
        &self.config
    }

    pub fn title_id(&self) -> Option<u64> {
        self.title_id
    }

    pub(crate) fn set_title_id(&mut self, title_id: Option<u64>) {
        self.title_id = title_id;
    }

    /// Archive of the current title, if a title is set and archives are enabled.
    pub fn archive_path(&self) -> Option<PathBuf> {
        if !self.config.archive_enabled {
            return None;
        }
        self.title_id.map(|id| self.config.archive_path(id))
    }

    /// Shader variants compiled since the last reset.
    pub fn compiled_shader_count(&self) -> u64 {
        self.compiled_shaders.load(Ordering::Relaxed)
    }

    pub(crate) fn record_shader_compile(&self) {
        self.compiled_shaders.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_counters(&self) {
        self.compiled_shaders.store(0, Ordering::Relaxed);
    }
}
