//! Async driver: owns the link and runs the scheduler tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use solarsis_frame::{ChunkWriter, FrameConfig, LineCodec, LineReader};
use solarsis_transport::LinkOpener;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::time::{Instant, MissedTickBehavior};

use crate::engine::{Action, Engine, EngineStats, PendingResponse, Submission};
use crate::error::Result;

/// Cloneable handle for submitting commands and reading results while the
/// driver runs.
pub struct EngineHandle<S> {
    engine: Arc<Mutex<Engine<S>>>,
}

impl<S> Clone for EngineHandle<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S> EngineHandle<S> {
    /// Queue a command without waiting for its reply.
    pub fn submit(&self, submission: Submission) -> Result<()> {
        self.engine.lock().submit(submission, Instant::now())
    }

    /// Queue a command and get a handle to its reply.
    pub fn request(&self, submission: Submission) -> Result<PendingResponse> {
        self.engine.lock().request(submission, Instant::now())
    }

    /// Queue the last dispatched command named `name` again.
    pub fn replay(&self, name: &str) -> Result<()> {
        self.engine.lock().replay(name)
    }

    /// Last cached reply of `path`.
    pub fn cached(&self, path: &str) -> Option<Value> {
        self.engine.lock().cached(path).cloned()
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.lock().stats()
    }

    /// Current transaction phase name.
    pub fn phase(&self) -> &'static str {
        self.engine.lock().phase().name()
    }

    /// Schema routes plus exposed quick commands.
    pub fn routes(&self) -> Vec<String> {
        let engine = self.engine.lock();
        engine.session().routes(engine.schema())
    }

    /// Run `f` against the application state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(self.engine.lock().state_mut())
    }
}

struct Link<T> {
    reader: LineReader<ReadHalf<T>>,
    writer: ChunkWriter<WriteHalf<T>>,
}

/// Drives one [`Engine`] over links produced by `O`.
pub struct Driver<O, S> {
    engine: Arc<Mutex<Engine<S>>>,
    opener: O,
    tick: Duration,
    frame_config: FrameConfig,
    open_failures: u32,
}

impl<O, S> Driver<O, S>
where
    O: LinkOpener,
    S: Send + 'static,
{
    /// Wrap `engine`; tick and line delimiter come from its session.
    pub fn new(engine: Engine<S>, opener: O) -> Result<Self> {
        let tick = engine.session().tick();
        let frame_config = engine.session().frame_config();
        LineCodec::new(frame_config.clone())?;
        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            opener,
            tick,
            frame_config,
            open_failures: 0,
        })
    }

    pub fn handle(&self) -> EngineHandle<S> {
        EngineHandle {
            engine: Arc::clone(&self.engine),
        }
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut link: Option<Link<O::Stream>> = None;
        tokio::pin!(shutdown);

        tracing::info!(
            link = %self.opener.describe(),
            tick_ms = self.tick.as_millis() as u64,
            "driver started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("driver stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.on_tick(&mut link).await;
                }
                line = next_line(&mut link) => match line {
                    Ok(line) => {
                        self.engine.lock().on_line(&line, Instant::now());
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "link read failed, closing");
                        link = None;
                        self.engine.lock().link_closed();
                    }
                },
            }
        }

        Ok(())
    }

    async fn on_tick(&mut self, link: &mut Option<Link<O::Stream>>) {
        let now = Instant::now();

        if link.is_none() {
            let Some(opened) = self.open_link() else {
                return;
            };
            *link = Some(opened);
            if let Err(err) = self.engine.lock().link_opened(now) {
                tracing::error!(error = %err, "startup commands failed");
            }
        }

        let action = self.engine.lock().poll(now);
        match action {
            Some(Action::Transmit { name, chunks }) => {
                let Some(active) = link.as_mut() else {
                    return;
                };
                match active.writer.send_chunks(&chunks).await {
                    Ok(bytes) => tracing::debug!(command = %name, bytes, "frame written"),
                    Err(err) => tracing::error!(
                        command = %name,
                        error = %err,
                        "frame write failed, waiting for restart threshold"
                    ),
                }
            }
            Some(Action::Restart) => {
                tracing::warn!(link = %self.opener.describe(), "closing link");
                *link = None;
                *link = self.open_link();
                self.engine.lock().restart_complete(link.is_some());
            }
            None => {}
        }
    }

    fn open_link(&mut self) -> Option<Link<O::Stream>> {
        let stream = match self.opener.open() {
            Ok(stream) => stream,
            Err(err) => {
                if self.open_failures == 0 {
                    tracing::warn!(link = %self.opener.describe(), error = %err, "link open failed");
                } else {
                    tracing::debug!(
                        link = %self.opener.describe(),
                        failures = self.open_failures + 1,
                        error = %err,
                        "link open failed"
                    );
                }
                self.open_failures = self.open_failures.saturating_add(1);
                return None;
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        match LineReader::with_config(read_half, self.frame_config.clone()) {
            Ok(reader) => {
                self.open_failures = 0;
                tracing::info!(link = %self.opener.describe(), "link opened");
                Some(Link {
                    reader,
                    writer: ChunkWriter::with_config(write_half, self.frame_config.clone()),
                })
            }
            Err(err) => {
                tracing::error!(error = %err, "invalid line configuration");
                None
            }
        }
    }
}

async fn next_line<T: solarsis_transport::LinkStream>(
    link: &mut Option<Link<T>>,
) -> solarsis_frame::Result<Bytes> {
    match link {
        Some(active) => active.reader.read_line().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use solarsis_transport::TransportError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::error::EngineError;
    use crate::session::SessionConfig;
    use crate::testing::sample_schema;

    struct TestOpener {
        devices: mpsc::UnboundedSender<DuplexStream>,
        opens: Arc<AtomicUsize>,
        fail_first: usize,
    }

    impl LinkOpener for TestOpener {
        type Stream = DuplexStream;

        fn open(&mut self) -> solarsis_transport::Result<DuplexStream> {
            let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(TransportError::Open {
                    link: self.describe(),
                    message: "device busy".to_string(),
                });
            }
            let (link, device) = tokio::io::duplex(1024);
            let _ = self.devices.send(device);
            Ok(link)
        }

        fn describe(&self) -> String {
            "duplex".to_string()
        }
    }

    struct Harness {
        handle: EngineHandle<()>,
        devices: mpsc::UnboundedReceiver<DuplexStream>,
        opens: Arc<AtomicUsize>,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    fn start(session: &str, fail_first: usize, setup: impl FnOnce(&EngineHandle<()>)) -> Harness {
        let session = SessionConfig::from_json_str(session).unwrap();
        let engine = Engine::new(Arc::new(sample_schema()), session, ()).unwrap();
        let (tx, devices) = mpsc::unbounded_channel();
        let opens = Arc::new(AtomicUsize::new(0));
        let opener = TestOpener {
            devices: tx,
            opens: Arc::clone(&opens),
            fail_first,
        };

        let driver = Driver::new(engine, opener).unwrap();
        let handle = driver.handle();
        setup(&handle);

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(driver.run(async move {
            let _ = stop_rx.await;
        }));
        Harness {
            handle,
            devices,
            opens,
            stop,
            task,
        }
    }

    impl Harness {
        async fn shutdown(self) {
            let _ = self.stop.send(());
            self.task.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_gets_parsed_reply() {
        let mut pending = None;
        let mut harness = start("{}", 0, |handle| {
            pending = Some(handle.request(Submission::new("query/QMOD")).unwrap());
        });

        let mut device = harness.devices.recv().await.unwrap();
        let mut frame = [0u8; 7];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"QMOD\x49\xc1\r");

        device.write_all(b"(B\xe7\xc9\r").await.unwrap();
        let reply = pending.unwrap().wait().await.unwrap();
        assert_eq!(reply.merged, json!({ "mode": "B" }));
        assert_eq!(harness.handle.phase(), "idle");
        assert_eq!(harness.opens.load(Ordering::SeqCst), 1);

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_triggers_single_restart() {
        let mut pending = None;
        let harness = start(
            r#"{
                "serial_queue_delay": 100,
                "serial_restart_threshold": 500,
                "serial_clear_command_queue_on_restart": true
            }"#,
            0,
            |handle| {
                pending = Some(handle.request(Submission::new("query/QMOD")).unwrap());
                handle.submit(Submission::new("query/QID")).unwrap();
            },
        );

        tokio::time::sleep(Duration::from_millis(750)).await;

        assert_eq!(harness.opens.load(Ordering::SeqCst), 2);
        let stats = harness.handle.stats();
        assert_eq!(stats.restarts, 1);
        assert_eq!(stats.sent, 1);
        assert!(matches!(
            pending.unwrap().wait().await,
            Err(EngineError::Abandoned)
        ));

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_opens_are_retried_each_tick() {
        let harness = start(r#"{ "serial_queue_delay": 100 }"#, 2, |_| {});

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(harness.opens.load(Ordering::SeqCst), 3);
        assert_eq!(harness.handle.stats().link_opens, 1);
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn device_hangup_reopens_link() {
        let mut harness = start(r#"{ "serial_queue_delay": 100 }"#, 0, |_| {});

        let device = harness.devices.recv().await.unwrap();
        drop(device);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(harness.opens.load(Ordering::SeqCst), 2);
        assert_eq!(harness.handle.stats().link_opens, 2);
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cached_reply_is_readable_through_handle() {
        let mut harness = start("{}", 0, |handle| {
            handle.submit(Submission::new("query/QPIGS")).unwrap();
        });

        let mut device = harness.devices.recv().await.unwrap();
        let mut frame = [0u8; 8];
        device.read_exact(&mut frame).await.unwrap();
        device.write_all(b"(230.0 50.0 0345 12\x00\x00\r").await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            harness.handle.cached("query/QPIGS/cache"),
            Some(json!({ "voltage": 230, "frequency": 50, "load_watt": 345, "battery": { "capacity": 12 } }))
        );
        assert!(harness.handle.routes().contains(&"/query/QPIGS/cache".to_string()));
        harness.shutdown().await;
    }
}
