//! Google Ad Manager Publisher Query Language client.
//!
//! [`AccountClientFactory`] hands out a [`PqlService`] scoped to one network
//! code. The production implementation talks SOAP to
//! `PublisherQueryLanguageService` with a service-account bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use serde_json::Value;

use crate::error::FetchError;
use crate::services::google_auth::{
    CredentialError, CredentialSource, ServiceAccountTokenSource, TokenSource,
};

pub const DEFAULT_ENDPOINT: &str = "https://ads.google.com/apis/ads/publisher";
pub const DEFAULT_API_VERSION: &str = "v202411";
pub const AD_MANAGER_SCOPE: &str = "https://www.googleapis.com/auth/dfp";

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const PUBLISHER_NS: &str = "https://www.google.com/apis/ads/publisher";

/// A single column descriptor of a PQL result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    pub label_name: String,
}

/// One result row; values are positional and line up with the column types.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub values: Vec<Value>,
}

/// One page of PQL results.
///
/// `column_types` is `None` when the response carried no column metadata at
/// all, which callers treat as an invalid response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub column_types: Option<Vec<ColumnType>>,
    pub rows: Vec<Row>,
}

/// Issues PQL select statements against one network.
#[async_trait]
pub trait PqlService {
    async fn select(&self, query: &str) -> Result<ResultSet, FetchError>;
}

/// Builds query clients for a network code.
#[async_trait]
pub trait AccountClientFactory {
    async fn client_for(
        &self,
        network_code: &str,
    ) -> Result<Box<dyn PqlService + Send + Sync>, FetchError>;
}

/// Endpoint settings shared by every client the factory creates.
#[derive(Debug, Clone)]
pub struct AdManagerSettings {
    pub endpoint: String,
    pub api_version: String,
    pub application_name: String,
}

impl Default for AdManagerSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            application_name: "childpub-monitor".to_string(),
        }
    }
}

impl AdManagerSettings {
    fn service_url(&self) -> String {
        format!(
            "{}/{}/PublisherQueryLanguageService",
            self.endpoint.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// SOAP client for `PublisherQueryLanguageService`, bound to one network.
#[derive(Clone)]
pub struct AdManagerClient {
    network_code: String,
    settings: AdManagerSettings,
    http: Client,
    tokens: Arc<dyn TokenSource + Send + Sync>,
}

impl AdManagerClient {
    pub fn new(
        network_code: impl Into<String>,
        settings: AdManagerSettings,
        http: Client,
        tokens: Arc<dyn TokenSource + Send + Sync>,
    ) -> Self {
        Self {
            network_code: network_code.into(),
            settings,
            http,
            tokens,
        }
    }

    pub fn network_code(&self) -> &str {
        &self.network_code
    }

    fn envelope(&self, query: &str) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<soapenv:Envelope xmlns:soapenv="{envelope_ns}" xmlns="{publisher_ns}/{version}">"#,
                "<soapenv:Header><RequestHeader>",
                "<networkCode>{network_code}</networkCode>",
                "<applicationName>{application_name}</applicationName>",
                "</RequestHeader></soapenv:Header>",
                "<soapenv:Body><select><selectStatement>",
                "<query>{query}</query>",
                "</selectStatement></select></soapenv:Body>",
                "</soapenv:Envelope>"
            ),
            envelope_ns = SOAP_ENVELOPE_NS,
            publisher_ns = PUBLISHER_NS,
            version = self.settings.api_version,
            network_code = quick_xml::escape::escape(&self.network_code),
            application_name = quick_xml::escape::escape(&self.settings.application_name),
            query = quick_xml::escape::escape(query),
        )
    }
}

#[async_trait]
impl PqlService for AdManagerClient {
    async fn select(&self, query: &str) -> Result<ResultSet, FetchError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|err| FetchError::remote_query(err.to_string()))?;

        let response = self
            .http
            .post(self.settings.service_url())
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "\"\"")
            .body(self.envelope(query))
            .send()
            .await
            .map_err(|err| FetchError::remote_query(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::remote_query(err.to_string()))?;

        // Faults come back as HTTP 500 with a SOAP body worth reporting.
        if let Some(fault) = parse_fault(&body) {
            return Err(FetchError::remote_query(fault));
        }
        if !status.is_success() {
            return Err(FetchError::remote_query(format!(
                "Ad Manager returned HTTP {}",
                status
            )));
        }

        parse_result_set(&body)
    }
}

/// Factory for [`AdManagerClient`]s authenticated with a service account.
pub struct AdManagerClientFactory {
    settings: AdManagerSettings,
    credentials: Option<CredentialSource>,
    http: Client,
}

impl AdManagerClientFactory {
    pub fn new(settings: AdManagerSettings, credentials: Option<CredentialSource>) -> Self {
        Self {
            settings,
            credentials,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl AccountClientFactory for AdManagerClientFactory {
    async fn client_for(
        &self,
        network_code: &str,
    ) -> Result<Box<dyn PqlService + Send + Sync>, FetchError> {
        let source = self
            .credentials
            .as_ref()
            .ok_or_else(|| FetchError::configuration(CredentialError::Missing.to_string()))?;
        let key = source
            .load()
            .await
            .map_err(|err| FetchError::configuration(err.to_string()))?;

        let tokens = ServiceAccountTokenSource::new(key, &[AD_MANAGER_SCOPE], self.http.clone());
        tracing::info!("Ad Manager client created for network code {}", network_code);

        Ok(Box::new(AdManagerClient::new(
            network_code,
            self.settings.clone(),
            self.http.clone(),
            Arc::new(tokens),
        )))
    }
}

// ---- SOAP response parsing ----

fn xml_error(err: impl std::fmt::Display) -> FetchError {
    FetchError::invalid_response(format!("Malformed SOAP response: {}", err))
}

fn xsi_type(start: &BytesStart<'_>) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == b"type")
        .map(|attr| {
            let raw = String::from_utf8_lossy(&attr.value).into_owned();
            // "ns:NumberValue" -> "NumberValue"
            raw.rsplit(':').next().unwrap_or_default().to_string()
        })
}

fn typed_value(text: &str, value_type: Option<&str>) -> Value {
    match value_type {
        Some("NumberValue") => text
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| text.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(text.to_string())),
        Some("BooleanValue") => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        _ => Value::String(text.to_string()),
    }
}

/// Extract the `faultstring` of a SOAP fault, if the body is one.
pub fn parse_fault(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut in_fault = false;
    let mut in_fault_string = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Fault" => in_fault = true,
                b"faultstring" if in_fault => in_fault_string = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_fault_string => {
                return Some(
                    t.unescape()
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| "SOAP fault".to_string()),
                );
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"Fault" => {
                return Some("SOAP fault".to_string());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Parse a `selectResponse` envelope into a [`ResultSet`].
pub fn parse_result_set(body: &str) -> Result<ResultSet, FetchError> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut result = ResultSet::default();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current_row: Option<Row> = None;
    let mut value_type: Option<String> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"columnTypes" => {
                        result.column_types.get_or_insert_with(Vec::new);
                    }
                    b"rows" => current_row = Some(Row::default()),
                    b"values" => {
                        value_type = xsi_type(&e);
                        if let Some(row) = current_row.as_mut() {
                            row.values.push(Value::Null);
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"values" => {
                    if let Some(row) = current_row.as_mut() {
                        row.values.push(Value::Null);
                    }
                }
                b"columnTypes" => {
                    result.column_types.get_or_insert_with(Vec::new);
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_error)?;
                let depth = stack.len();
                let parent = depth.checked_sub(2).and_then(|i| stack.get(i));
                let element = stack.last();

                match (parent.map(Vec::as_slice), element.map(Vec::as_slice)) {
                    (Some(b"columnTypes"), Some(b"labelName")) => {
                        if let Some(columns) = result.column_types.as_mut() {
                            columns.push(ColumnType {
                                label_name: text.into_owned(),
                            });
                        }
                    }
                    (Some(b"values"), Some(b"value")) => {
                        if let Some(slot) = current_row.as_mut().and_then(|r| r.values.last_mut()) {
                            *slot = typed_value(&text, value_type.as_deref());
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"rows" {
                    if let Some(row) = current_row.take() {
                        result.rows.push(row);
                    }
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::google_auth::StaticToken;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const SELECT_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <ResponseHeader xmlns="https://www.google.com/apis/ads/publisher/v202411">
      <requestId>abc</requestId>
    </ResponseHeader>
  </soap:Header>
  <soap:Body>
    <selectResponse xmlns="https://www.google.com/apis/ads/publisher/v202411">
      <rval>
        <columnTypes><labelName>id</labelName></columnTypes>
        <columnTypes><labelName>name</labelName></columnTypes>
        <columnTypes><labelName>childnetworkcode</labelName></columnTypes>
        <rows>
          <values xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="NumberValue"><value>123</value></values>
          <values xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="TextValue"><value>Acme &amp; Co</value></values>
          <values xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="TextValue"/>
        </rows>
        <rows>
          <values xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="NumberValue"><value>456</value></values>
          <values xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="TextValue"><value>Beta</value></values>
          <values xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="TextValue"><value>22000000001</value></values>
        </rows>
      </rval>
    </selectResponse>
  </soap:Body>
</soap:Envelope>"#;

    const FAULT_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:Server</faultcode>
      <faultstring>[AuthenticationError.NETWORK_NOT_FOUND @ ]</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;

    fn client(server: &MockServer) -> AdManagerClient {
        let settings = AdManagerSettings {
            endpoint: server.uri(),
            ..AdManagerSettings::default()
        };
        AdManagerClient::new(
            "23033612553",
            settings,
            Client::new(),
            Arc::new(StaticToken("test-token".into())),
        )
    }

    #[test]
    fn parses_columns_and_typed_values() {
        let result = parse_result_set(SELECT_RESPONSE).unwrap();

        let labels: Vec<&str> = result
            .column_types
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.label_name.as_str())
            .collect();
        assert_eq!(labels, ["id", "name", "childnetworkcode"]);

        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].values, vec![Value::from(123), Value::from("Acme & Co"), Value::Null]);
        assert_eq!(result.rows[1].values[2], Value::from("22000000001"));
    }

    #[test]
    fn empty_page_keeps_columns_without_rows() {
        let body = r#"<Envelope><Body><selectResponse><rval>
            <columnTypes><labelName>id</labelName></columnTypes>
        </rval></selectResponse></Body></Envelope>"#;
        let result = parse_result_set(body).unwrap();
        assert_eq!(result.column_types.unwrap().len(), 1);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn response_without_column_types_has_none() {
        let body = "<Envelope><Body><selectResponse/></Body></Envelope>";
        assert!(parse_result_set(body).unwrap().column_types.is_none());
    }

    #[test]
    fn fault_string_is_extracted() {
        assert_eq!(
            parse_fault(FAULT_RESPONSE).as_deref(),
            Some("[AuthenticationError.NETWORK_NOT_FOUND @ ]")
        );
        assert!(parse_fault(SELECT_RESPONSE).is_none());
    }

    #[test]
    fn envelope_escapes_query_and_carries_network_code() {
        let client = AdManagerClient::new(
            "23033612553",
            AdManagerSettings::default(),
            Client::new(),
            Arc::new(StaticToken("t".into())),
        );
        let envelope = client.envelope("SELECT Id FROM child_publisher WHERE Id < 5");

        assert!(envelope.contains("<networkCode>23033612553</networkCode>"));
        assert!(envelope.contains("WHERE Id &lt; 5"));
        assert!(envelope.contains("https://www.google.com/apis/ads/publisher/v202411"));
    }

    #[tokio::test]
    async fn select_posts_envelope_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v202411/PublisherQueryLanguageService"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_string_contains("FROM child_publisher"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(SELECT_RESPONSE, "text/xml"))
            .mount(&server)
            .await;

        let result = client(&server)
            .select("SELECT Id FROM child_publisher LIMIT 500 OFFSET 0")
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[tokio::test]
    async fn soap_fault_becomes_remote_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_raw(FAULT_RESPONSE, "text/xml"))
            .mount(&server)
            .await;

        let err = client(&server).select("SELECT Id FROM child_publisher").await.unwrap_err();
        match err {
            FetchError::RemoteQuery { message } => assert!(message.contains("NETWORK_NOT_FOUND")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn http_error_without_fault_is_remote_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).select("SELECT Id FROM child_publisher").await.unwrap_err();
        assert!(matches!(err, FetchError::RemoteQuery { .. }));
    }

    #[tokio::test]
    async fn factory_without_credentials_is_a_configuration_error() {
        let factory = AdManagerClientFactory::new(AdManagerSettings::default(), None);
        let err = factory.client_for("23033612553").await.err().unwrap();
        assert!(matches!(err, FetchError::Configuration { .. }));
    }

    #[tokio::test]
    async fn factory_with_malformed_env_credentials_is_a_configuration_error() {
        let factory = AdManagerClientFactory::new(
            AdManagerSettings::default(),
            Some(CredentialSource::Env("{not json".into())),
        );
        let err = factory.client_for("23033612553").await.err().unwrap();
        assert!(matches!(err, FetchError::Configuration { .. }));
    }
}
