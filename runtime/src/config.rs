//! Session configuration.
//!
//! Built explicitly with [`RuntimeConfig::builder`] or read from the
//! environment with [`RuntimeConfig::from_env`].

use bon::bon;

use crate::queue::MAX_QUEUES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Whether the program cache starts enabled.
    pub program_cache: bool,
    /// Command queues opened by the session, within `1..=MAX_QUEUES`.
    pub num_queues: usize,
}

#[bon]
impl RuntimeConfig {
    #[builder]
    pub fn new(#[builder(default)] program_cache: bool, #[builder(default = 1)] num_queues: usize) -> Self {
        Self { program_cache, num_queues: num_queues.clamp(1, MAX_QUEUES) }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RuntimeConfig {
    /// Read configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSERA_PROGRAM_CACHE=1` - Start with the program cache enabled
    /// * `TESSERA_NUM_QUEUES=N` - Open N command queues (clamped to `1..=2`)
    pub fn from_env() -> Self {
        let program_cache = std::env::var("TESSERA_PROGRAM_CACHE").is_ok_and(|value| value == "1");

        let mut num_queues = 1;
        if let Ok(value) = std::env::var("TESSERA_NUM_QUEUES")
            && let Ok(parsed) = value.parse::<usize>()
        {
            num_queues = parsed;
        }

        Self::builder().program_cache(program_cache).num_queues(num_queues).build()
    }
}
