//! Provider construction from configuration.

use std::sync::Arc;

use crate::config::{BackendConfig, ProviderKind, RuntimeConfig};

use super::{ApiCredential, LlmProvider, ProviderError};

/// Build the transport for one backend.
///
/// Fails with [`ProviderError::NotConfigured`] when the API key variable is
/// unset or the provider kind was compiled out.
pub fn create_provider(config: &BackendConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    let credential = ApiCredential::from_env(&config.api_key_env)?;
    provider_for(config, credential)
}

fn provider_for(
    config: &BackendConfig,
    credential: ApiCredential,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match config.provider {
        #[cfg(feature = "anthropic")]
        ProviderKind::Anthropic => Ok(Arc::new(
            super::AnthropicProvider::new(credential).with_base_url(&config.base_url),
        )),
        #[cfg(feature = "openai")]
        ProviderKind::Openai => Ok(Arc::new(super::OpenAiProvider::new(
            credential,
            &config.base_url,
        ))),
        #[allow(unreachable_patterns)]
        other => {
            drop(credential);
            Err(ProviderError::NotConfigured(format!(
                "{other} provider requires the '{other}' feature"
            )))
        }
    }
}

/// The two model backends, built once by the composition root and shared
/// by every case.
#[derive(Clone)]
pub struct Backends {
    pub auditor: Arc<dyn LlmProvider>,
    pub judge: Arc<dyn LlmProvider>,
}

impl Backends {
    pub fn new(auditor: Arc<dyn LlmProvider>, judge: Arc<dyn LlmProvider>) -> Self {
        Self { auditor, judge }
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            auditor: create_provider(&config.auditor)?,
            judge: create_provider(&config.judge)?,
        })
    }

    /// Close both backends' connection pools.
    pub async fn shutdown(&self) {
        futures::join!(self.auditor.shutdown(), self.judge.shutdown());
        tracing::info!("Model backends shut down");
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("auditor", &self.auditor.name())
            .field("judge", &self.judge.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_configured() {
        let mut config = BackendConfig::judge_default();
        config.api_key_env = "FORENSIC_TEST_KEY_THAT_IS_NEVER_SET".to_string();

        match create_provider(&config) {
            Err(ProviderError::NotConfigured(message)) => {
                assert!(message.contains("FORENSIC_TEST_KEY_THAT_IS_NEVER_SET"))
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("provider built without a key"),
        }
    }

    #[cfg(all(feature = "anthropic", feature = "openai"))]
    #[test]
    fn test_provider_kind_selects_transport() {
        let judge = provider_for(&BackendConfig::judge_default(), ApiCredential::new("k")).unwrap();
        assert_eq!(judge.name(), "anthropic");

        let auditor = provider_for(&BackendConfig::auditor_default(), ApiCredential::new("k")).unwrap();
        assert_eq!(auditor.name(), "openai");

        let backends = Backends::new(auditor, judge);
        assert_eq!(
            format!("{backends:?}"),
            "Backends { auditor: \"openai\", judge: \"anthropic\" }"
        );
    }
}
