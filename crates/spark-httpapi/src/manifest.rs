//! 声明式契约清单：以 TOML 描述需要注册的契约及其配置。
//!
//! ```toml
//! [[contract]]
//! name = "my_app::Orders"
//! http_host = "https://orders.example.com"
//! timeout_ms = 2500
//!
//! [contract.headers]
//! x-tenant = "alpha"
//! ```
//!
//! 每个条目经由 [`ContractCatalog`] 解析为描述符，再以运行期绑定器注册，
//! 条目中的字段被翻译为一个追加到该契约作用域的配置步骤。

use core::time::Duration;
use std::collections::BTreeMap;

use serde::Deserialize;

use crate::binder::ContractCatalog;
use crate::configuration::OptionsMutation;
use crate::error::{HttpApiError, Result};
use crate::extensions::HttpClientBuilder;
use crate::options::HttpApiOptions;
use crate::provider::ServiceCollection;

/// 清单根节点。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HttpApiManifest {
    #[serde(default, rename = "contract")]
    pub contracts: Vec<ContractManifest>,
}

/// 单个契约条目；缺省字段不修改对应配置。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContractManifest {
    pub name: String,
    #[serde(default)]
    pub http_host: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub use_logging: Option<bool>,
    #[serde(default)]
    pub use_default_user_agent: Option<bool>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ContractManifest {
    /// 把条目写入配置对象。
    pub fn apply_to(&self, options: &mut HttpApiOptions) {
        if let Some(host) = &self.http_host {
            options.http_host = Some(host.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            options.timeout = Some(Duration::from_millis(timeout_ms));
        }
        if let Some(use_logging) = self.use_logging {
            options.use_logging = use_logging;
        }
        if let Some(use_default_user_agent) = self.use_default_user_agent {
            options.use_default_user_agent = use_default_user_agent;
        }
        for (name, value) in &self.headers {
            options.add_default_header(name.as_str(), value.as_str());
        }
        options.properties.extend(
            self.properties
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
    }

    fn mutation(&self) -> OptionsMutation {
        let entry = self.clone();
        OptionsMutation::new(move |options| entry.apply_to(options))
    }
}

impl HttpApiManifest {
    /// 解析 TOML 文本，失败时返回 [`HttpApiError::Manifest`]。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| HttpApiError::Manifest {
            detail: err.to_string(),
        })
    }

    /// 注册清单中的全部契约。
    ///
    /// - **前置校验**：先解析全部名称，任何名称未知都会返回
    ///   [`HttpApiError::AdapterConstruction`]，此时不会注册任何契约；
    /// - **后置条件**：按条目顺序返回每个契约的构建器。
    pub fn apply(
        &self,
        services: &mut ServiceCollection,
        catalog: &ContractCatalog,
    ) -> Result<Vec<HttpClientBuilder>> {
        let resolved = self
            .contracts
            .iter()
            .map(|entry| {
                catalog
                    .descriptor_by_name(&entry.name)
                    .map(|descriptor| (descriptor, entry))
                    .ok_or_else(|| HttpApiError::AdapterConstruction {
                        descriptor: entry.name.clone(),
                        reason: "no contract registered under this name".to_owned(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        resolved
            .into_iter()
            .map(|(descriptor, entry)| {
                tracing::debug!(contract = %descriptor, "applying manifest entry");
                catalog.bind_with(services, Some(descriptor), Some(entry.mutation()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_contract_entries() {
        let manifest = HttpApiManifest::from_toml_str(
            r#"
            [[contract]]
            name = "app::Orders"
            http_host = "https://orders.example.com"
            timeout_ms = 1500
            use_default_user_agent = false

            [contract.headers]
            x-tenant = "alpha"

            [[contract]]
            name = "app::Users"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.contracts.len(), 2);
        let mut options = HttpApiOptions::default();
        manifest.contracts[0].apply_to(&mut options);
        assert_eq!(options.http_host.as_deref(), Some("https://orders.example.com"));
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert!(!options.use_default_user_agent);
        assert!(options.use_logging);
        assert_eq!(
            options.default_headers,
            vec![("x-tenant".to_owned(), "alpha".to_owned())]
        );

        let mut untouched = HttpApiOptions::default();
        manifest.contracts[1].apply_to(&mut untouched);
        assert_eq!(untouched, HttpApiOptions::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = HttpApiManifest::from_toml_str(
            r#"
            [[contract]]
            name = "app::Orders"
            retries = 3
            "#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "httpapi.manifest.invalid");
    }
}
