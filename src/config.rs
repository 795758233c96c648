use tracing::warn;

pub const ENV_RENDER_THREADS: &str = "SPLATSTREAM_RENDER_THREADS";
pub const ENV_TRANSFER_THREADS: &str = "SPLATSTREAM_TRANSFER_THREADS";
pub const ENV_DEVICE_MEMORY_MB: &str = "SPLATSTREAM_DEVICE_MEMORY_MB";

const DEFAULT_DEVICE_MEMORY: usize = 4 << 30;

/// Engine construction parameters.
///
/// `render_threads == 0` sizes the render queue to the machine's parallelism.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub device_name: String,
    pub render_threads: usize,
    pub transfer_threads: usize,
    pub device_memory_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "cpu-reference".to_string(),
            render_threads: 0,
            transfer_threads: 1,
            device_memory_budget: DEFAULT_DEVICE_MEMORY,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = read_env_usize(ENV_RENDER_THREADS) {
            config.render_threads = n;
        }
        if let Some(n) = read_env_usize(ENV_TRANSFER_THREADS) {
            config.transfer_threads = n.max(1);
        }
        if let Some(mb) = read_env_usize(ENV_DEVICE_MEMORY_MB) {
            config.device_memory_budget = mb.saturating_mul(1 << 20);
        }
        config
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn render_threads(mut self, threads: usize) -> Self {
        self.render_threads = threads;
        self
    }

    pub fn transfer_threads(mut self, threads: usize) -> Self {
        self.transfer_threads = threads.max(1);
        self
    }

    pub fn device_memory_budget(mut self, bytes: usize) -> Self {
        self.device_memory_budget = bytes;
        self
    }

    pub(crate) fn resolved_render_threads(&self) -> usize {
        if self.render_threads > 0 {
            return self.render_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

fn read_env_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(key, value = %raw, error = %err, "ignoring unparsable environment override");
            None
        }
    }
}

/// Per-draw defaults used when a camera batch leaves a field unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub near: f32,
    pub far: f32,
    pub background: [f32; 3],
    pub aa_epsilon: f32,
    pub sh_degree: i32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            near: 0.01,
            far: 100.0,
            background: [0.0, 0.0, 0.0],
            aa_epsilon: 0.3,
            sh_degree: -1,
        }
    }
}
