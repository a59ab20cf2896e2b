// This file is part of utxo-indexer.
// Copyright (C) 2025 The utxo-indexer authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Telemetry for the indexer: structured logging, tracing and Prometheus
//! metrics, set up once at startup via [init].
//!
//! Logging goes through the `log` facade with the `kv` feature. Keep messages
//! short and put the chain data into fields, rendered with `:%` (`Display`)
//! or `:?` (`Debug`):
//!
//! `info!(number, slot, hash:% = point.hash; "block confirmed")`
//!
//! Errors carry their full source chain:
//! `warn!(error = error.as_chain(); "chain-sync session failed")`.
//!
//! Tracing is fastrace based. The hot paths (process-confirmed, the store
//! commit) are annotated with `#[trace]`; spans are shipped over OTLP gRPC
//! when tracing is enabled, and log records made inside a span are attached
//! to it as events. Metrics go through the `metrics` facade and are served by
//! an embedded Prometheus endpoint when enabled.

use fastrace_opentelemetry::OpenTelemetryReporter;
use logforth::{
    append::{FastraceEvent, Stdout},
    diagnostic::FastraceDiagnostic,
    filter::EnvFilter,
    layout::{JsonLayout, TextLayout},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::InstrumentationScope;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use serde::Deserialize;
use std::{
    borrow::Cow,
    net::{IpAddr, Ipv4Addr},
};

/// Telemetry configuration: logging, tracing and metrics. Everything has a
/// deserialization default, so an empty section is valid.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(rename = "logging", default)]
    pub logging_config: LoggingConfig,

    #[serde(rename = "tracing", default)]
    pub tracing_config: TracingConfig,

    #[serde(rename = "metrics", default)]
    pub metrics_config: MetricsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON records; set to false for a plain text layout, e.g. when
    /// watching a local sync. Defaults to true.
    #[serde(default = "json_format_default")]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: json_format_default(),
        }
    }
}

/// Tracing configuration; disabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// OTLP gRPC endpoint spans are shipped to. Defaults to
    /// `"http://localhost:4317"`.
    #[serde(default = "otlp_endpoint_default")]
    pub otlp_endpoint: String,

    /// Service name reported with every span; defaults to the package name.
    #[serde(default = "service_name_default")]
    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: otlp_endpoint_default(),
            service_name: service_name_default(),
        }
    }
}

/// Metrics configuration; disabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Listen address of the Prometheus endpoint. Defaults to `"0.0.0.0"`.
    #[serde(default = "metrics_address_default")]
    pub address: IpAddr,

    /// Listen port of the Prometheus endpoint. Defaults to `9,464`.
    #[serde(default = "metrics_port_default")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: metrics_address_default(),
            port: metrics_port_default(),
        }
    }
}

/// Initialize logging, tracing and metrics from one [Config].
///
/// Call exactly once, before the first log record is made.
///
/// # Panics
///
/// Panics when called twice, or when the OTLP exporter or the Prometheus
/// endpoint cannot be set up.
pub fn init(config: Config) {
    let Config {
        logging_config,
        tracing_config,
        metrics_config,
    } = config;

    init_logging(logging_config);
    init_tracing(tracing_config);
    init_metrics(metrics_config);
}

/// Log records are filtered via the `RUST_LOG` environment variable, written
/// to stdout and, when made inside a span, attached to it as events together
/// with its trace ID.
fn init_logging(config: LoggingConfig) {
    if config.json_format {
        logforth::builder()
            .dispatch(|dispatch| {
                dispatch
                    .filter(EnvFilter::from_default_env())
                    .diagnostic(FastraceDiagnostic::default())
                    .append(Stdout::default().with_layout(JsonLayout::default()))
                    .append(FastraceEvent::default())
            })
            .apply();
    } else {
        logforth::builder()
            .dispatch(|dispatch| {
                dispatch
                    .filter(EnvFilter::from_default_env())
                    .diagnostic(FastraceDiagnostic::default())
                    .append(Stdout::default().with_layout(TextLayout::default()))
                    .append(FastraceEvent::default())
            })
            .apply();
    }
}

fn init_tracing(config: TracingConfig) {
    if !config.enabled {
        return;
    }

    let TracingConfig {
        otlp_endpoint,
        service_name,
        ..
    } = config;

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()
        .expect("OTLP span exporter can be built");

    let reporter = OpenTelemetryReporter::new(
        exporter,
        Cow::Owned(Resource::builder().with_service_name(service_name).build()),
        InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .build(),
    );

    fastrace::set_reporter(reporter, fastrace::collector::Config::default());
}

fn init_metrics(config: MetricsConfig) {
    if !config.enabled {
        return;
    }

    PrometheusBuilder::new()
        .with_http_listener((config.address, config.port))
        .install()
        .expect("Prometheus endpoint can be started");
}

fn json_format_default() -> bool {
    true
}

fn otlp_endpoint_default() -> String {
    "http://localhost:4317".to_owned()
}

fn service_name_default() -> String {
    env!("CARGO_PKG_NAME").to_owned()
}

fn metrics_address_default() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn metrics_port_default() -> u16 {
    9_464
}
