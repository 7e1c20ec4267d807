use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::{AuthScheme, DynHttpTransport, RetryPolicy};
use crate::provider::DynProvider;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_chat::OpenAiChatProvider;

/// 模型配置 描述一个可调用后端
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// 自定义句柄 例如 `default-openai`
    pub handle: String,
    pub provider: ProviderKind,
    pub credential: Credential,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// URL 版本段 例如 `v1` 或 `v1beta`，留空时按 provider 默认
    #[serde(default)]
    pub api_version: Option<String>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// 附加设置 例如 organization、project、anthropic_version、beta
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    AnthropicMessages,
    GoogleGemini,
}

impl ProviderKind {
    fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAiChat => "openai_chat",
            ProviderKind::AnthropicMessages => "anthropic_messages",
            ProviderKind::GoogleGemini => "google_gemini",
        }
    }
}

/// 鉴权信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// 简单 API Key
    ApiKey {
        /// header 名称 留空时按 provider 默认
        #[serde(default)]
        header: Option<String>,
        /// 密钥
        key: String,
    },
    /// Bearer Token
    Bearer { token: String },
    None,
}

/// 根据一组模型配置构建 LLMClient
pub fn build_client_from_configs(
    configs: &[ModelConfig],
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut builder = LLMClient::builder();

    for config in configs {
        let provider = build_provider_from_config(config, transport.clone())?;
        builder = builder.register_handle(config.handle.clone(), provider);
    }

    Ok(builder.build())
}

fn build_provider_from_config(
    config: &ModelConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let (key, auth) = resolve_credential(&config.credential, config.provider.name())?;
    let timeout = config.timeout_ms.map(Duration::from_millis);

    let provider: DynProvider = match config.provider {
        ProviderKind::OpenAiChat => {
            let mut provider =
                OpenAiChatProvider::new(transport, key).with_retry_policy(config.retry);

            if let Some(auth) = auth {
                provider = provider.with_auth(auth);
            }
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(version) = &config.api_version {
                provider = provider.with_api_version(version.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }

            if let Some(org) = extra_str(config, "organization") {
                provider = provider.with_organization(org);
            }
            if let Some(project) = extra_str(config, "project") {
                provider = provider.with_project(project);
            }

            Arc::new(provider)
        }
        ProviderKind::AnthropicMessages => {
            let mut provider =
                AnthropicMessagesProvider::new(transport, key).with_retry_policy(config.retry);

            if let Some(auth) = auth {
                provider = provider.with_auth(auth);
            }
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(version) = &config.api_version {
                provider = provider.with_api_version(version.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }

            if let Some(version) = extra_str(config, "anthropic_version") {
                provider = provider.with_version(version);
            }
            if let Some(beta) = extra_str(config, "beta") {
                provider = provider.with_beta(beta);
            }

            Arc::new(provider)
        }
        ProviderKind::GoogleGemini => {
            let mut provider =
                GoogleGeminiProvider::new(transport, key).with_retry_policy(config.retry);

            if let Some(auth) = auth {
                provider = provider.with_auth(auth);
            }
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(version) = &config.api_version {
                provider = provider.with_api_version(version.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }

            Arc::new(provider)
        }
    };

    Ok(provider)
}

/// Returns the key for the provider's default auth, plus an override when the
/// credential asks for a different scheme.
fn resolve_credential(
    credential: &Credential,
    provider: &'static str,
) -> Result<(String, Option<AuthScheme>), LLMError> {
    match credential {
        Credential::ApiKey {
            header: Some(header),
            key,
        } => Ok((
            key.clone(),
            Some(AuthScheme::Header {
                name: header.clone(),
                value: key.clone(),
            }),
        )),
        Credential::ApiKey { header: None, key } => Ok((key.clone(), None)),
        Credential::Bearer { token } => Ok((token.clone(), Some(AuthScheme::Bearer(token.clone())))),
        Credential::None => Err(LLMError::InvalidConfig {
            field: "credential".to_string(),
            reason: format!("provider {provider} requires credential"),
        }),
    }
}

fn extra_str(config: &ModelConfig, key: &str) -> Option<String> {
    match config.extra.get(key) {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}
