//! Cache volume registry.
//!
//! Cache volumes are named, persistent scratch areas managed by the engine.
//! A volume is identified purely by its name: two recipes that mount a volume
//! with the same name and sharing policy see the same backing storage.
//!
//! Each purpose gets its own volume so that, for example, compiling module A
//! does not wait on module B just because both download through the same
//! HTTP cache. The registry never evicts or sizes volumes; that is the
//! engine's concern.

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::pipeline::Recipe;

/// How concurrent recipes may share one cache volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sharing {
  /// Any number of concurrent users; the tool writing to it must be safe for
  /// concurrent access.
  Shared,
  /// One writer at a time; concurrent users are serialised by the engine.
  Locked,
}

impl Sharing {
  pub fn as_str(self) -> &'static str {
    match self {
      Sharing::Shared => "shared",
      Sharing::Locked => "locked",
    }
  }
}

impl std::fmt::Display for Sharing {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A resolved cache volume, as recorded in a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVolume {
  pub name: String,
  pub sharing: Sharing,
  pub owner: String,
}

/// What a cache volume is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePurpose {
  /// Package manager HTTP download cache.
  HttpDownloads,
  /// Installed package store.
  Packages,
  /// Compiler home: SDK workloads and intermediate objects.
  CompilerHome,
}

impl CachePurpose {
  pub const ALL: [CachePurpose; 3] = [
    CachePurpose::HttpDownloads,
    CachePurpose::Packages,
    CachePurpose::CompilerHome,
  ];
}

/// Configuration of one cache volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheVolumeConfig {
  pub name: String,
  pub sharing: Sharing,
  /// Where the volume is mounted inside recipes.
  pub mount: String,
  /// Environment variable pointed at `mount` so the package manager uses
  /// the volume.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub env: Option<String>,
}

impl CacheVolumeConfig {
  fn new(name: &str, sharing: Sharing, mount: &str, env: Option<&str>) -> Self {
    Self {
      name: name.to_string(),
      sharing,
      mount: mount.to_string(),
      env: env.map(str::to_string),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub http_downloads: CacheVolumeConfig,
  pub packages: CacheVolumeConfig,
  pub compiler_home: CacheVolumeConfig,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      http_downloads: CacheVolumeConfig::new(
        "nuget-http",
        Sharing::Shared,
        "/home/app/.local/share/NuGet/http-cache",
        Some("NUGET_HTTP_CACHE_PATH"),
      ),
      packages: CacheVolumeConfig::new("nuget-packages", Sharing::Shared, "/nuget", Some("NUGET_PACKAGES")),
      compiler_home: CacheVolumeConfig::new("dotnet-home", Sharing::Locked, "/home/app/.dotnet", None),
    }
  }
}

impl CacheConfig {
  pub fn get(&self, purpose: CachePurpose) -> &CacheVolumeConfig {
    match purpose {
      CachePurpose::HttpDownloads => &self.http_downloads,
      CachePurpose::Packages => &self.packages,
      CachePurpose::CompilerHome => &self.compiler_home,
    }
  }
}

/// Deterministic name-to-volume resolution.
pub struct CacheRegistry<'a> {
  config: &'a RuntimeConfig,
}

impl<'a> CacheRegistry<'a> {
  pub fn new(config: &'a RuntimeConfig) -> Self {
    Self { config }
  }

  pub fn volume(&self, purpose: CachePurpose) -> CacheVolume {
    let entry = self.config.cache.get(purpose);
    CacheVolume {
      name: entry.name.clone(),
      sharing: entry.sharing,
      owner: self.config.uid.clone(),
    }
  }

  pub fn mount_path(&self, purpose: CachePurpose) -> &'a str {
    &self.config.cache.get(purpose).mount
  }

  /// Returns `recipe` with the volume for `purpose` mounted at its path and,
  /// when configured, its environment variable pointing there.
  pub fn mount(&self, recipe: &Recipe, purpose: CachePurpose) -> Recipe {
    let path = self.mount_path(purpose);
    let recipe = recipe.with_cache_mount(path, self.volume(purpose));
    match &self.config.cache.get(purpose).env {
      Some(key) => recipe.with_env(key, path),
      None => recipe,
    }
  }
}
