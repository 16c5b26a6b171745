//! File downloads for `download` fields
//!
//! Every http(s) value of a field flagged `download` is fetched into
//! `<data-dir>/download`. Downloads run in the background behind a bounded
//! pool; `Destroy` waits for the ones still in flight.

use crate::config::{Config, DownloadSpec};
use crate::crawler::{build_http_client, ConcurrencyPool, FieldEvent};
use crate::plugin::traits::Plugin;
use crate::url::{is_http_url, url_hash};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use url::Url;

/// Pieces of a download URL, handed to custom file namers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub host: String,
    /// Directories of the URL path, without the file name
    pub dirs: Vec<String>,
    /// File name without its extension
    pub stem: String,
    /// Extension without the dot; may be empty
    pub ext: String,
}

impl DownloadTarget {
    /// Splits `url`; `ext` overrides the extension found in the URL
    pub fn parse(url: &str, ext: Option<&str>) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_string();

        let mut segments: Vec<String> = parsed
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let file = segments.pop().unwrap_or_default();

        let (stem, url_ext) = match file.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_string()),
            _ => (file, String::new()),
        };
        let stem = if stem.is_empty() { url_hash(url) } else { stem };
        let ext = match ext {
            Some(ext) => ext.trim_start_matches('.').to_string(),
            None => url_ext,
        };

        Some(Self {
            url: url.to_string(),
            host,
            dirs: segments,
            stem,
            ext,
        })
    }

    /// `<stem>.<ext>`, or the stem alone without an extension
    pub fn file_name(&self, stem: &str) -> String {
        if self.ext.is_empty() {
            stem.to_string()
        } else {
            format!("{}.{}", stem, self.ext)
        }
    }
}

/// Custom file stem for a download
pub type FileNamer = Arc<dyn Fn(&DownloadTarget) -> String + Send + Sync>;

/// Where `target` is saved under `dir`
///
/// Flat layout: `<dir>/<name>`. With `category`:
/// `<dir>/<host>/<dirs...>/<name>`.
pub fn download_path(
    dir: &Path,
    target: &DownloadTarget,
    spec: &DownloadSpec,
    namer: Option<&FileNamer>,
) -> PathBuf {
    let stem = match namer.map(|namer| namer(target)) {
        // Only the last component of a custom name is kept
        Some(custom) => Path::new(&custom)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| target.stem.clone()),
        None => target.stem.clone(),
    };

    let mut path = dir.to_path_buf();
    if spec.category {
        path.push(&target.host);
        path.extend(&target.dirs);
    }
    path.push(target.file_name(&stem));
    path
}

/// Downloads the values of `download` fields
pub struct DownloadPlugin {
    dir: PathBuf,
    client: Client,
    pool: ConcurrencyPool,
    namer: Option<FileNamer>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadPlugin {
    pub fn new(dir: impl Into<PathBuf>, client: Client, pool_size: usize) -> Self {
        Self {
            dir: dir.into(),
            client,
            pool: ConcurrencyPool::new(pool_size),
            namer: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Downloads into `<data-dir>/download`
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            config.crawler.data_dir.join("download"),
            build_http_client()?,
            config.download.pool_max as usize,
        ))
    }

    /// Names files with `namer` instead of the URL's file name
    pub fn with_namer(
        mut self,
        namer: impl Fn(&DownloadTarget) -> String + Send + Sync + 'static,
    ) -> Self {
        self.namer = Some(Arc::new(namer));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn schedule(&self, url: String, spec: DownloadSpec) {
        let Some(target) = DownloadTarget::parse(&url, spec.ext.as_deref()) else {
            tracing::debug!("not downloadable: {}", url);
            return;
        };
        let path = download_path(&self.dir, &target, &spec, self.namer.as_ref());
        let client = self.client.clone();
        let pool = self.pool.clone();

        let handle = tokio::spawn(async move {
            let Ok(_slot) = pool.acquire().await else {
                return;
            };
            if !spec.cover && tokio::fs::metadata(&path).await.is_ok() {
                tracing::debug!("{} already downloaded to {}", url, path.display());
                return;
            }
            match save(&client, &url, &path).await {
                Ok(bytes) => {
                    tracing::info!("downloaded {} ({} bytes) to {}", url, bytes, path.display())
                }
                Err(e) => tracing::error!("download of {} failed: {:#}", url, e),
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        }
    }

    /// Waits for every scheduled download
    pub async fn drain(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn save(client: &Client, url: &str, path: &Path) -> anyhow::Result<usize> {
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(path, &body)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(body.len())
}

#[async_trait]
impl Plugin for DownloadPlugin {
    fn name(&self) -> &str {
        "download"
    }

    async fn on_parser_field(&self, field: &FieldEvent) -> anyhow::Result<()> {
        let Some(spec) = &field.download else {
            return Ok(());
        };
        for url in field.strings().into_iter().filter(|u| is_http_url(u)) {
            self.schedule(url, spec.clone());
        }
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        self.drain().await;
        Ok(())
    }
}
