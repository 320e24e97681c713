//! Data service registry keeping the services of an application by key.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use measure_core::{
    DataService, Exporter, MeasureError, ProgressHandler, Result, ServiceActivationResult,
};

/// Registry of the data services an application offers.
///
/// Services are kept in registration order and looked up by their key.
/// Registering a service under a key that is already taken replaces the
/// earlier one.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use measure::{DataServiceRegistry, FitbitConfig, SqliteStore};
///
/// let store = Arc::new(SqliteStore::new("measures.db")?);
/// let registry = DataServiceRegistry::new()
///     .with_manual(store.clone())
///     .with_fitbit(FitbitConfig::from_env()?, store)?;
///
/// for service in registry.supported_services().await {
///     println!("{}", service.name());
/// }
/// ```
#[derive(Default)]
pub struct DataServiceRegistry {
    services: Vec<Arc<dyn DataService>>,
}

impl std::fmt::Debug for DataServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServiceRegistry")
            .field("services", &self.keys())
            .finish()
    }
}

impl DataServiceRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data service.
    pub fn register(&mut self, service: Arc<dyn DataService>) {
        debug!(service = service.key(), "Registering data service");
        if let Some(slot) = self
            .services
            .iter_mut()
            .find(|existing| existing.key() == service.key())
        {
            warn!(service = service.key(), "Replacing data service");
            *slot = service;
        } else {
            self.services.push(service);
        }
    }

    /// Keys of all registered services, in registration order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.key()).collect()
    }

    /// All registered services, in registration order.
    #[must_use]
    pub fn services(&self) -> &[Arc<dyn DataService>] {
        &self.services
    }

    /// Returns true if no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Looks up a service by key.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidParameter`] if no service has the key.
    pub fn get(&self, key: &str) -> Result<Arc<dyn DataService>> {
        self.services
            .iter()
            .find(|s| s.key() == key)
            .cloned()
            .ok_or_else(|| MeasureError::InvalidParameter(format!("Unknown data service: {key}")))
    }

    /// Services that can run on this system.
    ///
    /// Each service probes its support once; later calls reuse the result.
    pub async fn supported_services(&self) -> Vec<Arc<dyn DataService>> {
        let statuses = join_all(
            self.services
                .iter()
                .map(|service| service.check_supported_in_system()),
        )
        .await;
        self.services
            .iter()
            .zip(statuses)
            .filter_map(|(service, status)| {
                if status.supported {
                    Some(service.clone())
                } else {
                    debug!(
                        service = service.key(),
                        reason = ?status.reason,
                        "Data service not supported"
                    );
                    None
                }
            })
            .collect()
    }

    /// Activates the service with the given key.
    ///
    /// A failed activation is returned as an unsuccessful result, not as an
    /// error.
    ///
    /// # Errors
    /// Returns an error if the key is unknown or the service fails
    /// unexpectedly.
    pub async fn activate(
        &self,
        key: &str,
        progress: ProgressHandler<'_>,
    ) -> Result<ServiceActivationResult> {
        let service = self.get(key)?;
        let status = service.check_supported_in_system().await;
        if !status.supported {
            let reason = status
                .reason
                .map_or_else(|| "unsupported".to_string(), |r| r.to_string());
            return Ok(ServiceActivationResult::failed(reason));
        }
        let result = service.activate_in_system(progress).await?;
        if !result.success {
            warn!(service = key, error = ?result.error, "Activation failed");
        }
        Ok(result)
    }

    /// Deactivates the service with the given key.
    ///
    /// # Errors
    /// Returns an error if the key is unknown or the service fails.
    pub async fn deactivate(&self, key: &str) -> Result<bool> {
        self.get(key)?.deactivated_in_system().await
    }

    /// Exports the data of the service with the given key.
    ///
    /// # Errors
    /// Returns an error if the key is unknown or the export fails.
    pub async fn export(&self, key: &str, exporter: &Exporter) -> Result<bool> {
        self.get(key)?.export_data(exporter).await
    }

    /// Lets every service release its resources before the process exits.
    pub async fn on_system_exit(&self) {
        join_all(self.services.iter().map(|service| service.on_system_exit())).await;
    }

    /// Add the manual entry service.
    #[cfg(feature = "manual")]
    #[must_use]
    pub fn with_manual(mut self, store: Arc<dyn measure_core::RowStore>) -> Self {
        self.register(Arc::new(measure_manual::ManualEntryService::new(store)));
        self
    }

    /// Add the Fitbit service.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[cfg(feature = "fitbit")]
    pub fn with_fitbit(
        mut self,
        config: measure_fitbit::FitbitConfig,
        store: Arc<dyn measure_core::RowStore>,
    ) -> Result<Self> {
        let client = measure_fitbit::FitbitClient::new(config)?;
        self.register(Arc::new(measure_fitbit::FitbitService::new(
            Arc::new(client),
            store,
        )));
        Ok(self)
    }
}
