use std::time::Duration;

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use tracing::{info, warn};
use url::Url;

use crate::{ControllerError, ControllerResult};

const EXPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Metrics export for the controller
pub struct ControllerInstrumentation {
    pub meter_provider: Option<SdkMeterProvider>,
}

impl ControllerInstrumentation {
    /// Installs a global OTLP meter provider when `endpoint` is set.
    pub fn new(service_name: &str, endpoint: Option<&Url>) -> ControllerResult<Self> {
        match endpoint {
            None => {
                warn!("OTEL endpoint is not set. Skipping instrumentation.");
                Ok(Self { meter_provider: None })
            }
            Some(endpoint) => {
                let meter_provider = Self::instrument_metric_provider(service_name, endpoint)?;
                info!(endpoint = %endpoint, "OTEL metrics exporter initialized");
                Ok(Self { meter_provider: Some(meter_provider) })
            }
        }
    }

    fn instrument_metric_provider(service_name: &str, endpoint: &Url) -> ControllerResult<SdkMeterProvider> {
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.to_string())
            .build()
            .map_err(|e| ControllerError::OTELMetricsError(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter).with_interval(EXPORT_INTERVAL).build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(Resource::builder().with_service_name(format!("{service_name}_meter_service")).build())
            .build();

        global::set_meter_provider(provider.clone());
        Ok(provider)
    }

    pub fn shutdown(&self) -> ControllerResult<()> {
        match self.meter_provider {
            Some(ref meter_provider) => {
                meter_provider.shutdown().map_err(|e| ControllerError::OTELMetricsError(e.to_string()))
            }
            None => Ok(()),
        }
    }
}
