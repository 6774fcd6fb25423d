//! Capability interface onto the avatar rendering system.
//!
//! The runtime never draws anything itself. Startup picks one
//! [`RenderSurface`] implementation and hands it to the animation driver;
//! everything else talks to the avatar through the driver.

use crate::error::RuntimeResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Position of the model's centre anchor plus uniform scale, in container pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
        }
    }
}

/// One constructed model instance on the surface.
pub trait AvatarModel: Send + Sync {
    /// Unscaled width and height.
    fn natural_size(&self) -> (f32, f32);
    fn set_parameter(&self, name: &str, value: f32);
    fn trigger_motion(&self, group: &str);
    fn trigger_expression(&self, name: &str);
    fn set_transform(&self, transform: Transform);
    /// Names of the hit areas under a container-space point.
    fn hit_test(&self, x: f32, y: f32) -> Vec<String>;
    /// Releases textures and children. The instance is unusable afterwards.
    fn destroy(self: Box<Self>);
}

#[async_trait]
pub trait RenderSurface: Send + Sync {
    async fn load(&self, path: &str) -> RuntimeResult<Box<dyn AvatarModel>>;
    fn container_size(&self) -> (f32, f32);
}

/// Surface used when no display is attached. It keeps enough geometry to
/// answer hit tests and logs every call, so the rest of the runtime behaves
/// the same with or without a real renderer.
pub struct HeadlessSurface {
    container: (f32, f32),
    model_size: (f32, f32),
    live: Arc<AtomicUsize>,
}

impl HeadlessSurface {
    pub fn new(container_width: f32, container_height: f32) -> Self {
        Self {
            container: (container_width, container_height),
            model_size: (1000.0, 2000.0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of model instances constructed and not yet destroyed.
    pub fn live_models(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderSurface for HeadlessSurface {
    async fn load(&self, path: &str) -> RuntimeResult<Box<dyn AvatarModel>> {
        info!("Loading avatar model {}", path);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HeadlessModel {
            path: path.to_string(),
            size: self.model_size,
            transform: Mutex::new(Transform::default()),
            live: Arc::clone(&self.live),
        }))
    }

    fn container_size(&self) -> (f32, f32) {
        self.container
    }
}

struct HeadlessModel {
    path: String,
    size: (f32, f32),
    transform: Mutex<Transform>,
    live: Arc<AtomicUsize>,
}

impl AvatarModel for HeadlessModel {
    fn natural_size(&self) -> (f32, f32) {
        self.size
    }

    fn set_parameter(&self, name: &str, value: f32) {
        tracing::trace!("{} = {:.3}", name, value);
    }

    fn trigger_motion(&self, group: &str) {
        debug!("Motion '{}' on {}", group, self.path);
    }

    fn trigger_expression(&self, name: &str) {
        debug!("Expression '{}' on {}", name, self.path);
    }

    fn set_transform(&self, transform: Transform) {
        *self.transform.lock().unwrap_or_else(PoisonError::into_inner) = transform;
    }

    fn hit_test(&self, x: f32, y: f32) -> Vec<String> {
        let t = *self.transform.lock().unwrap_or_else(PoisonError::into_inner);
        let half_w = self.size.0 * t.scale / 2.0;
        let half_h = self.size.1 * t.scale / 2.0;
        let (left, top) = (t.x - half_w, t.y - half_h);

        if x < left || x > t.x + half_w || y < top || y > t.y + half_h {
            return Vec::new();
        }
        // Head occupies the top quarter of the bounds.
        if y <= top + half_h / 2.0 {
            vec!["Head".to_string()]
        } else {
            vec!["Body".to_string()]
        }
    }

    fn destroy(self: Box<Self>) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        info!("Released avatar model {}", self.path);
    }
}
