//! Tunable parameters for the packet pool and connection registry.
//!
//! Collected into a runtime-overridable [`Config`] instead of bare `const`
//! items, so an embedding application (or a test) can run more than one
//! tuning profile in the same process without a recompile. The historical
//! build-time constants remain as the struct's default values.

#![allow(dead_code)]

/// Size of a pooled packet's inline payload area.
///
/// Must be at least [`DEFAULT_FILE_READ_SIZE`] + 64 so the file-segment
/// variant's header plus scratch buffer always fits.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Bytes read per positional-read iteration by the file-segment writer.
pub const DEFAULT_FILE_READ_SIZE: usize = DEFAULT_PACKET_SIZE - 64;

/// Number of packets pre-allocated in the pool before spilling to the heap.
pub const DEFAULT_PACKET_POOL: usize = 256;

/// Floor for registry growth, so the first grow from an empty table doesn't
/// thrash on a handful of early descriptors.
pub const MIN_REGISTRY_CAPACITY: usize = 16;

/// Runtime configuration for a [`crate::registry::Registry`] / pool pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub packet_size: usize,
    pub file_read_size: usize,
    pub packet_pool: usize,
    pub min_registry_capacity: usize,
}

impl Config {
    /// The historical build-time constants, as a runtime value.
    pub const DEFAULT: Config = Config {
        packet_size: DEFAULT_PACKET_SIZE,
        file_read_size: DEFAULT_FILE_READ_SIZE,
        packet_pool: DEFAULT_PACKET_POOL,
        min_registry_capacity: MIN_REGISTRY_CAPACITY,
    };

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder { cfg: Config::DEFAULT }
    }

    /// Validate the `packet_size >= file_read_size + 64` constraint from §6.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.packet_size < self.file_read_size + 64 {
            return Err("packet_size must be >= file_read_size + 64");
        }
        if self.packet_pool == 0 {
            return Err("packet_pool must be non-zero");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}

/// Builder for overriding individual tunables without recompiling.
pub struct ConfigBuilder {
    cfg: Config,
}

impl ConfigBuilder {
    pub fn packet_size(mut self, n: usize) -> Self {
        self.cfg.packet_size = n;
        self
    }

    pub fn file_read_size(mut self, n: usize) -> Self {
        self.cfg.file_read_size = n;
        self
    }

    pub fn packet_pool(mut self, n: usize) -> Self {
        self.cfg.packet_pool = n;
        self
    }

    pub fn min_registry_capacity(mut self, n: usize) -> Self {
        self.cfg.min_registry_capacity = n;
        self
    }

    pub fn build(self) -> Result<Config, &'static str> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
