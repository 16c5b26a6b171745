//! Plugin system
//!
//! Plugins observe and shape the crawl through lifecycle events dispatched by
//! the [`PluginBus`].

mod bus;
mod cache;
mod download;
mod event;
mod progress;
mod traits;

pub use bus::PluginBus;
pub(crate) use bus::panic_message;
pub use cache::CachePlugin;
pub use download::{download_path, DownloadPlugin, DownloadTarget, FileNamer};
pub use event::{EndEvent, Event, EventKind, Notification, PipeEvent, SpiderEvent};
pub use progress::{progress_line, wants_print_all, ProgressPlugin};
pub use traits::Plugin;
