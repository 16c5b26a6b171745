//! Ordered, fault-isolated event dispatch

use crate::plugin::event::{Event, Notification};
use crate::plugin::traits::Plugin;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;

const NOTIFICATION_CAPACITY: usize = 1024;

/// Dispatches lifecycle events to registered plugins
///
/// Handlers are awaited one after another in registration order. A handler
/// that errors or panics is logged and skipped; the next one still runs.
/// Every event is also broadcast as a [`Notification`]; slow listeners lose
/// messages rather than slowing the crawl.
pub struct PluginBus {
    plugins: Vec<Arc<dyn Plugin>>,
    notifier: broadcast::Sender<Notification>,
}

impl PluginBus {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { plugins, notifier }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Receives a notification for every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Runs every plugin's handler for `event`
    pub async fn emit(&self, mut event: Event<'_>) {
        let kind = event.kind();
        // No receivers is not an error
        let _ = self.notifier.send(Notification::from(&event));

        for plugin in &self.plugins {
            let outcome = AssertUnwindSafe(dispatch(plugin.as_ref(), &mut event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("plugin '{}' failed on {}: {:#}", plugin.name(), kind, e);
                }
                Err(panic) => {
                    tracing::error!(
                        "plugin '{}' panicked on {}: {}",
                        plugin.name(),
                        kind,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }
}

async fn dispatch(plugin: &dyn Plugin, event: &mut Event<'_>) -> anyhow::Result<()> {
    match event {
        Event::Init(config) => plugin.on_init(config).await,
        Event::BeforeRequest(request) => plugin.on_before_request(request).await,
        Event::AfterRequest(request) => plugin.on_after_request(request).await,
        Event::BeforeParser(ctx) => plugin.on_before_parser(ctx).await,
        Event::ParserField(field) => plugin.on_parser_field(field).await,
        Event::AfterParser(page) => plugin.on_after_parser(page).await,
        Event::BeforeTarget(targets) => plugin.on_before_target(targets).await,
        Event::AreaTarget(targets) => plugin.on_area_target(targets).await,
        Event::ParserTarget(targets) => plugin.on_parser_target(targets).await,
        Event::AfterTarget(targets) => plugin.on_after_target(targets).await,
        Event::InitSpider(e) => plugin.on_init_spider(e).await,
        Event::StartSpider(e) => plugin.on_start_spider(e).await,
        Event::PipeSpider(e) => plugin.on_pipe_spider(e).await,
        Event::EndSpider(e) => plugin.on_end_spider(e).await,
        Event::Destroy => plugin.on_destroy().await,
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_before_target(&self, targets: &mut Vec<String>) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name.clone());
            targets.push(format!("https://a.com/{}", self.name));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_before_target(&self, _targets: &mut Vec<String>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Plugin for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn on_before_target(&self, _targets: &mut Vec<String>) -> anyhow::Result<()> {
            panic!("handler panicked")
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Plugin> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn test_emit_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = PluginBus::new(vec![recorder("first", &log), recorder("second", &log)]);

        let mut targets = Vec::new();
        bus.emit(Event::BeforeTarget(&mut targets)).await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(
            targets,
            vec!["https://a.com/first", "https://a.com/second"]
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_break_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = PluginBus::new(vec![
            recorder("before", &log),
            Arc::new(Failing),
            Arc::new(Panicking),
            recorder("after", &log),
        ]);

        let mut targets = Vec::new();
        bus.emit(Event::BeforeTarget(&mut targets)).await;

        assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn test_default_handlers_are_noops() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = PluginBus::new(vec![recorder("only", &log)]);
        bus.emit(Event::Destroy).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_are_broadcast() {
        let bus = PluginBus::new(Vec::new());
        let mut rx = bus.subscribe();

        bus.emit(Event::Destroy).await;

        let note = rx.recv().await.unwrap();
        assert_eq!(note.kind, crate::plugin::EventKind::Destroy);
        assert_eq!(note.all, None);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
