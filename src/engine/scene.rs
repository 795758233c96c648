use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::raster::DeviceScene;

use super::device::Reservation;

static NEXT_SCENE_ID: AtomicU64 = AtomicU64::new(1);

struct SceneInner {
    id: u64,
    data: DeviceScene,
    _memory: Reservation,
}

/// Read-only, device-resident splat scene.
///
/// Every in-flight draw holds a clone, so the device copy outlives the
/// caller's handle until the last draw referencing it has completed.
#[derive(Clone)]
pub struct Scene {
    inner: Arc<SceneInner>,
}

impl Scene {
    pub(crate) fn new(data: DeviceScene, memory: Reservation) -> Self {
        Self {
            inner: Arc::new(SceneInner {
                id: NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed),
                data,
                _memory: memory,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    pub fn sh_degree(&self) -> u8 {
        self.inner.data.sh_degree()
    }

    pub fn byte_size(&self) -> usize {
        self.inner.data.byte_size()
    }

    /// Number of live handles, including those held by pending draws.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn data(&self) -> &DeviceScene {
        &self.inner.data
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("id", &self.inner.id)
            .field("splats", &self.len())
            .field("sh_degree", &self.sh_degree())
            .finish()
    }
}
