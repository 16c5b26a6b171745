//! On-disk page cache
//!
//! Pages are stored as `<data-dir>/html/<sha256(url)>.html`. A cached page is
//! served while its file is younger than the configured TTL.

use crate::config::Config;
use crate::crawler::HttpRequest;
use crate::plugin::traits::Plugin;
use crate::url::url_hash;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub struct CachePlugin {
    dir: PathBuf,
    ttl: Duration,
    min_length: usize,
}

impl CachePlugin {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, min_length: usize) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            min_length,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.crawler.data_dir.join("html"),
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.min_length,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.html", url_hash(url)))
    }

    async fn is_fresh(&self, path: &Path) -> bool {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());
        matches!(age, Some(age) if age <= self.ttl)
    }
}

#[async_trait]
impl Plugin for CachePlugin {
    fn name(&self) -> &str {
        "cache"
    }

    async fn on_before_request(&self, request: &mut HttpRequest) -> anyhow::Result<()> {
        if !request.cache || request.content.is_some() {
            return Ok(());
        }
        let path = self.path_for(&request.url);
        if !self.is_fresh(&path).await {
            return Ok(());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        if content.len() > self.min_length {
            tracing::debug!("cache hit for {}", request.url);
            request.content = Some(content);
        }
        Ok(())
    }

    async fn on_after_request(&self, request: &HttpRequest) -> anyhow::Result<()> {
        if !request.cache || request.from_cache {
            return Ok(());
        }
        let Some(content) = request.content.as_deref() else {
            return Ok(());
        };
        if content.len() <= self.min_length {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(&request.url), content).await?;
        Ok(())
    }
}
