//! The control point stack: shared services every device list runs on.

use std::fmt;
use std::sync::Arc;

use netif::{AdapterSource, NetworkAdapterList, SystemAdapterSource};
use soap_client::SoapClient;
use timer_manager::TimerManager;
use upnp_discovery::{HttpXmlFetcher, MulticastListenerRegistry, SsdpTransport, UdpSsdpTransport, XmlFetcher};

use crate::config::StackConfig;
use crate::error::{ControlPointError, Result};
use crate::transport::ServiceTransport;

/// Owns the timer manager, adapter list and transports shared by every
/// [`DeviceList`](crate::DeviceList) created on it.
///
/// Device lists hold an `Arc` to the stack, so the stack outlives them.
/// Dropping the last reference stops the timer worker and the adapter
/// notifier.
pub struct ControlPointStack {
    config: StackConfig,
    timers: Arc<TimerManager>,
    adapters: NetworkAdapterList,
    ssdp: Arc<dyn SsdpTransport>,
    fetcher: Arc<dyn XmlFetcher>,
    services: Arc<dyn ServiceTransport>,
}

impl ControlPointStack {
    /// Build a stack on the real network with default collaborators.
    pub fn new(config: StackConfig) -> Result<Arc<Self>> {
        Self::builder(config).build()
    }

    /// Start building a stack, optionally replacing collaborators.
    pub fn builder(config: StackConfig) -> StackBuilder {
        StackBuilder {
            config,
            adapter_source: None,
            ssdp: None,
            fetcher: None,
            services: None,
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn timers(&self) -> &Arc<TimerManager> {
        &self.timers
    }

    pub fn adapters(&self) -> &NetworkAdapterList {
        &self.adapters
    }

    pub fn ssdp(&self) -> &Arc<dyn SsdpTransport> {
        &self.ssdp
    }

    pub fn fetcher(&self) -> &Arc<dyn XmlFetcher> {
        &self.fetcher
    }

    pub fn services(&self) -> &Arc<dyn ServiceTransport> {
        &self.services
    }
}

impl fmt::Debug for ControlPointStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPointStack")
            .field("config", &self.config)
            .field("current_adapter", &self.adapters.current_adapter())
            .finish_non_exhaustive()
    }
}

impl Drop for ControlPointStack {
    fn drop(&mut self) {
        self.timers.stop();
        tracing::info!("Control point stack stopped");
    }
}

/// Builder for [`ControlPointStack`]
///
/// Any collaborator left unset gets its default: [`SystemAdapterSource`],
/// [`UdpSsdpTransport`], [`HttpXmlFetcher`] and [`SoapClient`].
pub struct StackBuilder {
    config: StackConfig,
    adapter_source: Option<Arc<dyn AdapterSource>>,
    ssdp: Option<Arc<dyn SsdpTransport>>,
    fetcher: Option<Arc<dyn XmlFetcher>>,
    services: Option<Arc<dyn ServiceTransport>>,
}

impl StackBuilder {
    pub fn with_adapter_source(mut self, source: Arc<dyn AdapterSource>) -> Self {
        self.adapter_source = Some(source);
        self
    }

    pub fn with_ssdp_transport(mut self, ssdp: Arc<dyn SsdpTransport>) -> Self {
        self.ssdp = Some(ssdp);
        self
    }

    pub fn with_xml_fetcher(mut self, fetcher: Arc<dyn XmlFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_service_transport(mut self, services: Arc<dyn ServiceTransport>) -> Self {
        self.services = Some(services);
        self
    }

    /// Validate the configuration and start the stack's threads.
    pub fn build(self) -> Result<Arc<ControlPointStack>> {
        let config = self.config;
        config.validate()?;

        let timers = TimerManager::new().map_err(ControlPointError::Timer)?;

        let source: Arc<dyn AdapterSource> = match self.adapter_source {
            Some(source) => source,
            None => Arc::new(SystemAdapterSource::new(
                config.loopback,
                config.adapter_poll_interval,
            )),
        };
        let adapters =
            NetworkAdapterList::new(source, config.default_subnet, config.adapter_retry.clone())?;

        let ssdp: Arc<dyn SsdpTransport> = match self.ssdp {
            Some(ssdp) => ssdp,
            None => Arc::new(UdpSsdpTransport::new(
                Arc::new(MulticastListenerRegistry::new()),
                config.msearch_time_secs,
            )),
        };
        let fetcher: Arc<dyn XmlFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpXmlFetcher::new(config.fetch_timeout, config.fetch_workers)?),
        };
        let services: Arc<dyn ServiceTransport> = match self.services {
            Some(services) => services,
            None => Arc::new(SoapClient::new()),
        };

        match adapters.current_adapter() {
            Some(adapter) => tracing::info!("Control point stack started on {}", adapter),
            None => tracing::info!("Control point stack started with no usable adapter"),
        }

        Ok(Arc::new(ControlPointStack {
            config,
            timers,
            adapters,
            ssdp,
            fetcher,
            services,
        }))
    }
}
