use crate::animation::renderer::{AvatarModel, RenderSurface, Transform};
use crate::catalog::ModelRegistry;
use crate::config::AvatarConfig;
use crate::error::RuntimeResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

pub const MOUTH_PARAMETER: &str = "ParamMouthOpenY";
pub const SPEAK_MOTION: &str = "speak";
pub const TAP_MOTION: &str = "tap";
pub const TAP_HEAD_MOTION: &str = "tap_head";
pub const SURPRISED_EXPRESSION: &str = "surprised";

struct LoadedModel {
    instance: Box<dyn AvatarModel>,
    path: String,
    transform: Transform,
}

struct LoadRequest {
    id: u64,
    path: String,
}

struct DragState {
    last: (f32, f32),
}

/// Sole owner of the render surface's current model. Every mutation of the
/// avatar goes through here.
pub struct AnimationDriver {
    surface: Arc<dyn RenderSurface>,
    registry: Arc<RwLock<ModelRegistry>>,
    config: AvatarConfig,
    /// Held for the whole teardown + construct sequence. tokio's mutex is
    /// FIFO, so later requests queue behind the in-flight one.
    load_lock: tokio::sync::Mutex<()>,
    /// Newest load not yet finished. Queued loads that are no longer the
    /// newest give up their turn.
    latest: Mutex<Option<LoadRequest>>,
    next_request: AtomicU64,
    model: Mutex<Option<LoadedModel>>,
    drag: Mutex<Option<DragState>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AnimationDriver {
    pub fn new(
        surface: Arc<dyn RenderSurface>,
        registry: Arc<RwLock<ModelRegistry>>,
        config: AvatarConfig,
    ) -> Self {
        Self {
            surface,
            registry,
            config,
            load_lock: tokio::sync::Mutex::new(()),
            latest: Mutex::new(None),
            next_request: AtomicU64::new(1),
            model: Mutex::new(None),
            drag: Mutex::new(None),
        }
    }

    pub fn resolve(&self, character_id: &str) -> String {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(character_id)
            .to_string()
    }

    /// Loads the model for `character_id`. Loads run one at a time; a
    /// request that is overtaken by a newer one while queued is skipped, so
    /// the avatar always ends on the most recent request.
    pub async fn load_model(&self, character_id: &str) -> RuntimeResult<()> {
        let path = self.resolve(character_id);

        let id = {
            let mut latest = lock(&self.latest);
            if latest.as_ref().is_some_and(|req| req.path == path) {
                debug!("Model {} already requested, ignoring", path);
                return Ok(());
            }
            let id = self.next_request.fetch_add(1, Ordering::Relaxed);
            *latest = Some(LoadRequest {
                id,
                path: path.clone(),
            });
            id
        };

        let _pending = self.load_lock.lock().await;

        if lock(&self.latest).as_ref().map(|req| req.id) != Some(id) {
            debug!("Load of {} superseded while queued", path);
            return Ok(());
        }
        if self.current_model().as_deref() == Some(path.as_str()) {
            debug!("Model {} already shown", path);
            self.finish_request(id);
            return Ok(());
        }

        if let Some(previous) = lock(&self.model).take() {
            info!("Tearing down model {}", previous.path);
            previous.instance.destroy();
        }
        *lock(&self.drag) = None;

        let result = self.surface.load(&path).await;
        self.finish_request(id);

        let instance = match result {
            Ok(instance) => instance,
            Err(e) => {
                warn!("Failed to load model {} for {}: {}", path, character_id, e);
                return Err(e);
            }
        };

        let transform = self.fit(instance.natural_size());
        instance.set_transform(transform);
        info!(
            "Model {} ready for {} (scale {:.3})",
            path, character_id, transform.scale
        );
        *lock(&self.model) = Some(LoadedModel {
            instance,
            path,
            transform,
        });
        Ok(())
    }

    fn finish_request(&self, id: u64) {
        let mut latest = lock(&self.latest);
        if latest.as_ref().is_some_and(|req| req.id == id) {
            *latest = None;
        }
    }

    /// Uniform scale so the model fits within `fit_ratio` of the container,
    /// centred with a fixed vertical offset.
    fn fit(&self, natural: (f32, f32)) -> Transform {
        let (cw, ch) = self.surface.container_size();
        let (mw, mh) = natural;
        let scale = if mw > 0.0 && mh > 0.0 {
            (cw / mw).min(ch / mh) * self.config.fit_ratio
        } else {
            1.0
        };
        Transform {
            x: cw / 2.0,
            y: ch / 2.0 + self.config.vertical_offset,
            scale,
        }
    }

    pub fn current_model(&self) -> Option<String> {
        lock(&self.model).as_ref().map(|m| m.path.clone())
    }

    pub fn current_transform(&self) -> Option<Transform> {
        lock(&self.model).as_ref().map(|m| m.transform)
    }

    /// Ignored while no model is ready.
    pub fn set_mouth_open(&self, value: f32) {
        if let Some(model) = lock(&self.model).as_ref() {
            model
                .instance
                .set_parameter(MOUTH_PARAMETER, value.clamp(0.0, 1.0));
        }
    }

    pub fn speak(&self) {
        if let Some(model) = lock(&self.model).as_ref() {
            model.instance.trigger_motion(SPEAK_MOTION);
        }
    }

    pub fn express(&self, expression: &str) {
        if let Some(model) = lock(&self.model).as_ref() {
            model.instance.trigger_expression(expression);
        }
    }

    pub fn tap(&self, x: f32, y: f32) {
        let guard = lock(&self.model);
        let Some(model) = guard.as_ref() else {
            return;
        };
        let hits = model.instance.hit_test(x, y);
        if hits.iter().any(|area| area.eq_ignore_ascii_case("head")) {
            model.instance.trigger_expression(SURPRISED_EXPRESSION);
            model.instance.trigger_motion(TAP_HEAD_MOTION);
        } else {
            model.instance.trigger_motion(TAP_MOTION);
        }
    }

    pub fn pointer_down(&self, x: f32, y: f32) {
        if lock(&self.model).is_some() {
            *lock(&self.drag) = Some(DragState { last: (x, y) });
        }
    }

    pub fn pointer_move(&self, x: f32, y: f32) {
        let mut drag = lock(&self.drag);
        let Some(state) = drag.as_mut() else {
            return;
        };
        let mut guard = lock(&self.model);
        let Some(model) = guard.as_mut() else {
            *drag = None;
            return;
        };
        model.transform.x += x - state.last.0;
        model.transform.y += y - state.last.1;
        state.last = (x, y);
        model.instance.set_transform(model.transform);
    }

    pub fn pointer_up(&self) {
        *lock(&self.drag) = None;
    }

    pub fn zoom(&self, delta: f32) {
        let mut guard = lock(&self.model);
        let Some(model) = guard.as_mut() else {
            return;
        };
        let scale = model.transform.scale - delta * self.config.zoom_sensitivity;
        model.transform.scale = if scale.is_finite() {
            scale.clamp(self.config.min_scale, self.config.max_scale)
        } else {
            model.transform.scale
        };
        model.instance.set_transform(model.transform);
    }
}
