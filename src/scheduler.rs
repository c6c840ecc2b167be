use crate::camera::CaptureStreamManager;
use crate::client::ClassificationClient;
use crate::detection::{ClassificationOutcome, Detection};
use crate::encoder::FrameEncoder;
use crate::error::PipelineError;
use crate::events::{ClassificationResult, EventBus, LivescanEvent};
use crate::frame::FrameDimensions;
use crate::session::SessionAggregator;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// At most one holder at a time; the guard releases on drop
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flight: Arc::clone(self),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FlightGuard {
    flight: Arc<SingleFlight>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flight.busy.store(false, Ordering::Release);
    }
}

/// Detections of the most recent successful cycle, in source-frame pixels
#[derive(Debug, Clone, PartialEq)]
pub struct LatestDetections {
    pub frame_id: u64,
    pub source: FrameDimensions,
    pub detections: Vec<Detection>,
    pub timestamp: SystemTime,
}

struct CycleContext {
    manager: Arc<CaptureStreamManager>,
    encoder: FrameEncoder,
    client: Arc<ClassificationClient>,
    session: Arc<SessionAggregator>,
    latest: RwLock<Option<LatestDetections>>,
    flight: Arc<SingleFlight>,
    event_bus: Arc<EventBus>,
}

impl CycleContext {
    async fn publish(&self, event: LivescanEvent) {
        let _ = self.event_bus.publish(event).await;
    }
}

struct TickLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic driver of classification cycles.
///
/// Ticks that land while a cycle is outstanding are dropped, never queued.
/// The loop stops by itself when the stream it was started on goes away
/// (released, restarted or switched) or the client gives up on the service.
pub struct SamplingScheduler {
    ctx: Arc<CycleContext>,
    tick_loop: Mutex<Option<TickLoop>>,
}

impl SamplingScheduler {
    pub fn new(
        manager: Arc<CaptureStreamManager>,
        encoder: FrameEncoder,
        client: Arc<ClassificationClient>,
        session: Arc<SessionAggregator>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            ctx: Arc::new(CycleContext {
                manager,
                encoder,
                client,
                session,
                latest: RwLock::new(None),
                flight: Arc::new(SingleFlight::new()),
                event_bus,
            }),
            tick_loop: Mutex::new(None),
        }
    }

    /// Start ticking every `period`, replacing any running loop
    pub fn enable(&self, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let token = CancellationToken::new();
        let ctx = Arc::clone(&self.ctx);

        let handle = {
            let token = token.clone();
            tokio::spawn(async move { run_tick_loop(ctx, period, token).await })
        };

        if let Some(previous) = self.tick_loop.lock().replace(TickLoop { token, handle }) {
            previous.token.cancel();
        }

        info!("Sampling enabled every {:?}", period);
    }

    /// Stop ticking and cancel any in-flight cycle
    pub async fn disable(&self) {
        let tick_loop = self.tick_loop.lock().take();
        if let Some(tick_loop) = tick_loop {
            tick_loop.token.cancel();
            if let Err(e) = tick_loop.handle.await {
                if !e.is_cancelled() {
                    error!("Sampling loop ended abnormally: {}", e);
                }
            }
            info!("Sampling disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tick_loop
            .lock()
            .as_ref()
            .map(|l| !l.token.is_cancelled() && !l.handle.is_finished())
            .unwrap_or(false)
    }

    /// Whether a cycle is outstanding right now
    pub fn in_flight(&self) -> bool {
        self.ctx.flight.is_busy()
    }

    pub fn latest(&self) -> Option<LatestDetections> {
        self.ctx.latest.read().clone()
    }

    pub fn clear_latest(&self) {
        self.ctx.latest.write().take();
    }
}

async fn run_tick_loop(ctx: Arc<CycleContext>, period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut active_rx = ctx.manager.subscribe_active();
    let mut generation_rx = ctx.manager.subscribe_generation();
    let generation = *generation_rx.borrow_and_update();

    ctx.publish(LivescanEvent::SamplingStarted {
        period_ms: period.as_millis() as u64,
        timestamp: SystemTime::now(),
    })
    .await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = active_rx.changed() => {
                if changed.is_err() || !*active_rx.borrow_and_update() {
                    info!("Capture stream inactive, stopping sampling");
                    break;
                }
            }
            changed = generation_rx.changed() => {
                if changed.is_err() || *generation_rx.borrow_and_update() != generation {
                    info!("Capture stream replaced, stopping sampling");
                    break;
                }
            }
            _ = interval.tick() => {
                match ctx.flight.try_acquire() {
                    Some(guard) => {
                        let ctx = Arc::clone(&ctx);
                        let token = token.clone();
                        tokio::spawn(async move { run_cycle(ctx, guard, token).await });
                    }
                    None => {
                        debug!("Tick skipped, classification cycle still in flight");
                        ctx.publish(LivescanEvent::TickSkipped {
                            timestamp: SystemTime::now(),
                        })
                        .await;
                    }
                }
            }
        }
    }

    token.cancel();
    ctx.publish(LivescanEvent::SamplingStopped {
        timestamp: SystemTime::now(),
    })
    .await;
}

/// One encode, transmit and resolve sequence. The flight guard is held
/// until the outcome has been applied or discarded.
async fn run_cycle(ctx: Arc<CycleContext>, _guard: FlightGuard, loop_token: CancellationToken) {
    let generation = ctx.manager.generation();

    let payload = match ctx
        .manager
        .current_frame()
        .and_then(|frame| ctx.encoder.encode(&frame).map_err(PipelineError::from))
    {
        Ok(payload) => payload,
        Err(e) if e.is_silent() => {
            debug!("Skipping tick: {}", e);
            return;
        }
        Err(e) => {
            warn!("Skipping tick: {}", e);
            return;
        }
    };

    let cancel = loop_token.child_token();
    let mut outcome = ctx.client.classify(&payload, &cancel).await;

    if cancel.is_cancelled()
        || ctx.manager.generation() != generation
        || !ctx.manager.is_active()
    {
        debug!("Discarding outcome of frame {}, stream torn down", payload.frame_id);
        return;
    }

    for detection in &mut outcome.detections {
        detection.bbox = payload.to_source_rect(&detection.bbox);
    }

    apply_outcome(&ctx, &loop_token, outcome, payload.frame_id, payload.source).await;
}

async fn apply_outcome(
    ctx: &CycleContext,
    loop_token: &CancellationToken,
    outcome: ClassificationOutcome,
    frame_id: u64,
    source: FrameDimensions,
) {
    match &outcome.error {
        None => {
            ctx.session.record(&outcome);
            trace!(
                "Frame {} resolved with {} detections",
                frame_id,
                outcome.detections.len()
            );
            *ctx.latest.write() = Some(LatestDetections {
                frame_id,
                source,
                detections: outcome.detections.clone(),
                timestamp: SystemTime::now(),
            });
            ctx.publish(LivescanEvent::ClassificationResult(ClassificationResult {
                frame_id,
                detections: outcome.detections,
                metadata: outcome.metadata,
                source,
                attempts: outcome.attempts,
                timestamp: SystemTime::now(),
            }))
            .await;
        }
        Some(e) if e.is_terminal() => {
            if outcome.attempts > 0 {
                ctx.session.record(&outcome);
            }
            error!("{}, releasing camera", e);
            loop_token.cancel();
            let event = match e {
                PipelineError::ServiceUnavailable { attempts } => {
                    LivescanEvent::ServiceUnavailable {
                        attempts: *attempts,
                        timestamp: SystemTime::now(),
                    }
                }
                other => LivescanEvent::DeviceUnavailable {
                    reason: other.to_string(),
                    timestamp: SystemTime::now(),
                },
            };
            ctx.publish(event).await;
            ctx.manager.stop().await;
        }
        Some(e) if e.is_silent() => {
            debug!("Frame {} skipped: {}", frame_id, e);
        }
        Some(e) => {
            ctx.session.record(&outcome);
            warn!("Classification of frame {} failed: {}", frame_id, e);
            ctx.publish(LivescanEvent::ClassificationFailed {
                error: e.to_string(),
                attempts: outcome.attempts,
                timestamp: SystemTime::now(),
            })
            .await;
        }
    }
}
