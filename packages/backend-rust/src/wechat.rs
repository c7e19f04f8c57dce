use serde::Deserialize;
use thiserror::Error;

const CODE2SESSION_PATH: &str = "/sns/jscode2session";

#[derive(Debug, Clone)]
pub struct WechatConfig {
    pub provider: WechatProviderType,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WechatProviderType {
    Http,
    Mock,
}

#[derive(Debug, Error)]
pub enum WechatError {
    #[error("wechat not configured: {0}")]
    NotConfigured(&'static str),
    #[error("empty login code")]
    EmptyCode,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}")]
    HttpStatus { status: reqwest::StatusCode },
    #[error("wechat api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("wechat response missing openid")]
    MissingOpenid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WechatSession {
    pub openid: String,
    pub unionid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Code2SessionResponse {
    openid: Option<String>,
    unionid: Option<String>,
    errcode: Option<i64>,
    errmsg: Option<String>,
}

#[derive(Clone)]
pub struct WechatClient {
    config: WechatConfig,
    client: reqwest::Client,
}

impl WechatClient {
    pub fn new(config: WechatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn mock() -> Self {
        Self::new(WechatConfig {
            provider: WechatProviderType::Mock,
            app_id: None,
            app_secret: None,
            api_base: String::new(),
        })
    }

    pub fn provider_type(&self) -> WechatProviderType {
        self.config.provider
    }

    pub fn is_available(&self) -> bool {
        match self.config.provider {
            WechatProviderType::Http => {
                self.config.app_id.is_some() && self.config.app_secret.is_some()
            }
            WechatProviderType::Mock => true,
        }
    }

    /// Exchanges a mini-program login code for the user's openid.
    pub async fn code_to_session(&self, code: &str) -> Result<WechatSession, WechatError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(WechatError::EmptyCode);
        }

        match self.config.provider {
            WechatProviderType::Mock => Ok(WechatSession {
                openid: format!("mock_{code}"),
                unionid: None,
            }),
            WechatProviderType::Http => self.code_to_session_http(code).await,
        }
    }

    async fn code_to_session_http(&self, code: &str) -> Result<WechatSession, WechatError> {
        let app_id = self
            .config
            .app_id
            .as_deref()
            .ok_or(WechatError::NotConfigured("WECHAT_APP_ID"))?;
        let app_secret = self
            .config
            .app_secret
            .as_deref()
            .ok_or(WechatError::NotConfigured("WECHAT_APP_SECRET"))?;

        let url = format!(
            "{}{CODE2SESSION_PATH}",
            self.config.api_base.trim_end_matches('/')
        );

        let resp = self
            .client
            .get(url)
            .query(&[
                ("appid", app_id),
                ("secret", app_secret),
                ("js_code", code),
                ("grant_type", "authorization_code"),
            ])
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(WechatError::HttpStatus {
                status: resp.status(),
            });
        }

        // WeChat answers text/plain, so parse the body ourselves.
        let body = resp.text().await?;
        parse_code2session(&body)
    }
}

fn parse_code2session(body: &str) -> Result<WechatSession, WechatError> {
    let parsed: Code2SessionResponse = serde_json::from_str(body).map_err(|err| WechatError::Api {
        code: -1,
        message: format!("invalid response: {err}"),
    })?;

    if let Some(code) = parsed.errcode.filter(|code| *code != 0) {
        return Err(WechatError::Api {
            code,
            message: parsed.errmsg.unwrap_or_default(),
        });
    }

    let openid = parsed
        .openid
        .filter(|value| !value.is_empty())
        .ok_or(WechatError::MissingOpenid)?;

    Ok(WechatSession {
        openid,
        unionid: parsed.unionid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_derives_openid_from_code() {
        let client = WechatClient::mock();
        let session = client.code_to_session(" abc ").await.unwrap();
        assert_eq!(session.openid, "mock_abc");
        assert!(session.unionid.is_none());
    }

    #[tokio::test]
    async fn empty_code_is_rejected() {
        let client = WechatClient::mock();
        assert!(matches!(
            client.code_to_session("  ").await,
            Err(WechatError::EmptyCode)
        ));
    }

    #[tokio::test]
    async fn http_provider_requires_credentials() {
        let client = WechatClient::new(WechatConfig {
            provider: WechatProviderType::Http,
            app_id: None,
            app_secret: None,
            api_base: "http://127.0.0.1:9".to_string(),
        });
        assert!(!client.is_available());
        assert!(matches!(
            client.code_to_session("abc").await,
            Err(WechatError::NotConfigured("WECHAT_APP_ID"))
        ));
    }

    #[test]
    fn parses_success_body() {
        let session =
            parse_code2session(r#"{"openid":"o1","session_key":"k","unionid":"u1"}"#).unwrap();
        assert_eq!(session.openid, "o1");
        assert_eq!(session.unionid.as_deref(), Some("u1"));
    }

    #[test]
    fn parses_error_body() {
        let err = parse_code2session(r#"{"errcode":40029,"errmsg":"invalid code"}"#).unwrap_err();
        match err {
            WechatError::Api { code, message } => {
                assert_eq!(code, 40029);
                assert_eq!(message, "invalid code");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_errcode_with_openid_is_success() {
        let session = parse_code2session(r#"{"errcode":0,"openid":"o2"}"#).unwrap();
        assert_eq!(session.openid, "o2");
    }
}
