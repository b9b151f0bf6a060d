//! Static driver registry.
//!
//! Maps a backend type name to the constructor of its driver. The built-in
//! registry is populated once, on first use, with every driver compiled into
//! this build; callers with their own drivers start from
//! [`DriverRegistry::with_builtins`] and [`register`](DriverRegistry::register)
//! more.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use multisearch_core::{Driver, Error, Result};
use multisearch_drivers::{BackendOptions, MemoryDriver};

/// Builds a driver from its options.
pub type DriverConstructor = fn(BackendOptions) -> BoxFuture<'static, Result<Arc<dyn Driver>>>;

static BUILTIN: LazyLock<DriverRegistry> = LazyLock::new(DriverRegistry::with_builtins);

/// Backend type name → driver constructor.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    constructors: BTreeMap<String, DriverConstructor>,
}

impl DriverRegistry {
    /// A registry with no drivers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every driver compiled into this build.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(multisearch_drivers::memory::BACKEND, open_memory);
        #[cfg(feature = "driver-tantivy")]
        registry.register(multisearch_drivers::tantivy_driver::BACKEND, open_tantivy);
        #[cfg(feature = "driver-redis")]
        registry.register(multisearch_drivers::redis_driver::BACKEND, open_redis);
        registry
    }

    /// The shared built-in registry.
    pub fn builtin() -> &'static DriverRegistry {
        &BUILTIN
    }

    /// Add or replace the constructor for `name`.
    pub fn register(&mut self, name: impl Into<String>, constructor: DriverConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Whether `name` has a constructor.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Construct the driver for `name`.
    ///
    /// # Errors
    ///
    /// `UnknownBackend` when nothing is registered under `name`; the options
    /// are not looked at and no storage is touched. Otherwise whatever the
    /// driver's constructor returns.
    pub async fn construct(&self, name: &str, options: BackendOptions) -> Result<Arc<dyn Driver>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownBackend {
                backend: name.to_string(),
            })?;
        log::debug!("Constructing '{name}' driver");
        constructor(options).await
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

fn open_memory(options: BackendOptions) -> BoxFuture<'static, Result<Arc<dyn Driver>>> {
    async move {
        let driver: Arc<dyn Driver> = Arc::new(MemoryDriver::open(&options)?);
        Ok(driver)
    }
    .boxed()
}

#[cfg(feature = "driver-tantivy")]
fn open_tantivy(options: BackendOptions) -> BoxFuture<'static, Result<Arc<dyn Driver>>> {
    async move {
        let driver: Arc<dyn Driver> =
            Arc::new(multisearch_drivers::TantivyDriver::open(&options)?);
        Ok(driver)
    }
    .boxed()
}

#[cfg(feature = "driver-redis")]
fn open_redis(options: BackendOptions) -> BoxFuture<'static, Result<Arc<dyn Driver>>> {
    async move {
        let driver: Arc<dyn Driver> =
            Arc::new(multisearch_drivers::RedisDriver::open(&options).await?);
        Ok(driver)
    }
    .boxed()
}
