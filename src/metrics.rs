//! Device Manager Metrics
//!
//! Prometheus instrumentation for any [`DeviceManager`]: operation counts by
//! outcome, operation latency and the last capacity snapshot.

use crate::domain::ports::{Capacity, DeviceInfo, DeviceManager, DeviceManagerRef, DeviceMode};
use crate::error::{Error, Result};
use async_trait::async_trait;
use prometheus::{GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;

fn register_error(e: prometheus::Error) -> Error {
    Error::Configuration(format!("metrics registration failed: {}", e))
}

/// Wraps a backend and records every call
pub struct MeteredDeviceManager {
    inner: DeviceManagerRef,
    operations: IntCounterVec,
    duration: HistogramVec,
    capacity: GaugeVec,
}

impl MeteredDeviceManager {
    /// Register the collectors in `registry` and wrap `inner`
    pub fn new(inner: DeviceManagerRef, registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "pmem_device_operations_total",
                "Device manager operations by outcome",
            ),
            &["operation", "result"],
        )
        .map_err(register_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "pmem_device_operation_duration_seconds",
                "Duration of device manager operations",
            ),
            &["operation"],
        )
        .map_err(register_error)?;
        let capacity = GaugeVec::new(
            Opts::new("pmem_capacity_bytes", "Last reported PMEM capacity"),
            &["kind"],
        )
        .map_err(register_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(register_error)?;
        registry
            .register(Box::new(capacity.clone()))
            .map_err(register_error)?;

        Ok(Self {
            inner,
            operations,
            duration,
            capacity,
        })
    }

    fn record<T>(&self, operation: &str, started: Instant, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
        self.duration
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl DeviceManager for MeteredDeviceManager {
    fn mode(&self) -> DeviceMode {
        self.inner.mode()
    }

    async fn capacity(&self) -> Result<Capacity> {
        let started = Instant::now();
        let result = self.inner.capacity().await;
        self.record("capacity", started, &result);

        if let Ok(cap) = &result {
            for (kind, value) in [
                ("total", cap.total),
                ("managed", cap.managed),
                ("available", cap.available),
                ("max_volume_size", cap.max_volume_size),
            ] {
                self.capacity.with_label_values(&[kind]).set(value as f64);
            }
        }
        result
    }

    async fn create_device(&self, volume_id: &str, size: u64) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.create_device(volume_id, size).await;
        self.record("create", started, &result);
        result
    }

    async fn delete_device(&self, volume_id: &str, flush: bool) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.delete_device(volume_id, flush).await;
        self.record("delete", started, &result);
        result
    }

    async fn get_device(&self, volume_id: &str) -> Result<DeviceInfo> {
        let started = Instant::now();
        let result = self.inner.get_device(volume_id).await;
        self.record("get", started, &result);
        result
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let started = Instant::now();
        let result = self.inner.list_devices().await;
        self.record("list", started, &result);
        result
    }
}
