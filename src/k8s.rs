use crate::error::KronoformError;
use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

/// Connected cluster client plus the kubeconfig facts the commands need.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    default_namespace: String,
}

impl KubeGateway {
    pub async fn connect() -> Result<Self, KronoformError> {
        Self::from_kubeconfig()
            .await
            .map_err(|error| KronoformError::ClientUnavailable {
                reason: format!("{error:#}"),
            })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    async fn from_kubeconfig() -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            Config::from_custom_kubeconfig(kubeconfig_value, &KubeConfigOptions::default())
                .await
                .context("failed to load Kubernetes configuration from kubeconfig")?
        } else {
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        let context = kubeconfig
            .and_then(|cfg| cfg.current_context)
            .unwrap_or_else(|| "in-cluster".to_string());
        debug!(%context, namespace = %default_namespace, "connected to cluster");

        Ok(Self {
            client,
            context,
            default_namespace,
        })
    }
}
