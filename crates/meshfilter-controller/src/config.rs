//! Command line and environment configuration

use std::time::Duration;

use clap::{Parser, ValueEnum};
use meshfilter_common::DEFAULT_ROOT_NAMESPACE;
use meshfilter_translation::{
    TranslationConfig, DEFAULT_CONSUMER_FILTER_NAME, DEFAULT_GOLANG_LIBRARY_ID,
    DEFAULT_GOLANG_LIBRARY_PATH,
};

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// JSON lines
    Json,
    /// Human readable text
    Text,
}

/// meshfilter controller - compiles filter policies and consumers into Istio EnvoyFilters
#[derive(Parser, Debug, Clone)]
#[command(name = "meshfilter-controller", version, about, long_about = None)]
pub struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Namespace generated EnvoyFilters are written to
    #[arg(long, env = "MESHFILTER_ROOT_NAMESPACE", default_value = DEFAULT_ROOT_NAMESPACE)]
    pub root_namespace: String,

    /// Name of the consumer aggregate EnvoyFilter
    #[arg(long, env = "MESHFILTER_CONSUMER_FILTER_NAME", default_value = DEFAULT_CONSUMER_FILTER_NAME)]
    pub consumer_filter_name: String,

    /// Path of the golang filter library on the proxy
    #[arg(long, env = "MESHFILTER_GOLANG_LIBRARY_PATH", default_value = DEFAULT_GOLANG_LIBRARY_PATH)]
    pub golang_library_path: String,

    /// Library id of the golang filter
    #[arg(long, env = "MESHFILTER_GOLANG_LIBRARY_ID", default_value = DEFAULT_GOLANG_LIBRARY_ID)]
    pub golang_library_id: String,

    /// Seconds between periodic reconciles
    #[arg(long, env = "MESHFILTER_REQUEUE_SECS", default_value_t = 300)]
    pub requeue_secs: u64,

    /// Seconds before retrying a failed reconcile
    #[arg(long, env = "MESHFILTER_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Log output format
    #[arg(long, env = "MESHFILTER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Requeue timing of the controllers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeueSettings {
    /// Delay after a successful pass
    pub success: Duration,
    /// Delay after a failed pass
    pub error: Duration,
}

impl Default for RequeueSettings {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(300),
            error: Duration::from_secs(30),
        }
    }
}

impl Cli {
    /// Engine configuration
    pub fn translation_config(&self) -> TranslationConfig {
        TranslationConfig {
            root_namespace: self.root_namespace.clone(),
            consumer_filter_name: self.consumer_filter_name.clone(),
            golang_library_path: self.golang_library_path.clone(),
            golang_library_id: self.golang_library_id.clone(),
        }
    }

    /// Requeue timing
    pub fn requeue(&self) -> RequeueSettings {
        RequeueSettings {
            success: Duration::from_secs(self.requeue_secs),
            error: Duration::from_secs(self.error_requeue_secs),
        }
    }
}
