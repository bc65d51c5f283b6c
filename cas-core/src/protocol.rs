//! CAS protocol responses and their XML/JSON renderings.
//!
//! Both renderings carry the same content. XML follows the
//! `http://www.yale.edu/tp/cas` namespace; JSON mirrors it as
//! `{"serviceResponse": {"authenticationSuccess": {...}}}`.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::principal::{is_xml_name, releasable, Attributes, Principal};
use crate::service::Service;

const CAS_NAMESPACE: &str = "http://www.yale.edu/tp/cas";

/// Error codes reported in `authenticationFailure` and `proxyFailure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    InvalidRequest,
    InvalidTicketSpec,
    UnauthorizedServiceProxy,
    InvalidProxyCallback,
    InvalidTicket,
    InvalidService,
    UnauthorizedService,
    InternalError,
}

impl ValidationErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidTicketSpec => "INVALID_TICKET_SPEC",
            Self::UnauthorizedServiceProxy => "UNAUTHORIZED_SERVICE_PROXY",
            Self::InvalidProxyCallback => "INVALID_PROXY_CALLBACK",
            Self::InvalidTicket => "INVALID_TICKET",
            Self::InvalidService => "INVALID_SERVICE",
            Self::UnauthorizedService => "UNAUTHORIZED_SERVICE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol revision of a validation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// `/validate`, plain text.
    V1,
    /// `/serviceValidate`, `/proxyValidate`.
    V2,
    /// `/p3/serviceValidate`, `/p3/proxyValidate`.
    V3,
}

/// Response format selected with the `format` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Xml,
    Json,
}

impl ResponseFormat {
    /// Parse a `format` parameter; anything unrecognized falls back to XML.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some(f) if f.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Xml,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Xml => "application/xml;charset=UTF-8",
            Self::Json => "application/json",
        }
    }
}

/// Outcome of a successful ticket validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// Principal with only the attributes released to the service.
    pub principal: Principal,
    pub service: Service,
    pub authentication_date: DateTime<Utc>,
    pub from_new_login: bool,
    /// PGTIOU paired with a proxy-granting ticket sent to `pgtUrl`.
    pub proxy_granting_ticket_iou: Option<String>,
    /// Proxy chain, most recent proxy first.
    pub proxies: Vec<Service>,
}

impl Assertion {
    /// Build the success body for a protocol version.
    ///
    /// CAS 3 always includes attributes plus authentication metadata; CAS 2
    /// includes principal attributes only when `v2_attributes` is set.
    pub fn to_success(&self, version: ProtocolVersion, v2_attributes: bool) -> AuthenticationSuccess {
        let attributes = match version {
            ProtocolVersion::V3 => {
                let mut attributes = releasable(&self.principal.attributes, |_| true);
                attributes.insert(
                    "authenticationDate".to_string(),
                    vec![self
                        .authentication_date
                        .to_rfc3339_opts(SecondsFormat::Millis, true)],
                );
                attributes.insert(
                    "isFromNewLogin".to_string(),
                    vec![self.from_new_login.to_string()],
                );
                attributes
            }
            ProtocolVersion::V2 if v2_attributes => {
                releasable(&self.principal.attributes, |_| true)
            }
            _ => Attributes::new(),
        };
        AuthenticationSuccess {
            user: self.principal.id.clone(),
            attributes,
            proxy_granting_ticket: self.proxy_granting_ticket_iou.clone(),
            proxies: self.proxies.iter().map(|s| s.as_str().to_string()).collect(),
        }
    }

    /// CAS 1 plain-text body.
    pub fn to_cas1(&self) -> String {
        format!("yes\n{}\n", self.principal.id)
    }
}

/// CAS 1 plain-text failure body.
pub const CAS1_FAILURE: &str = "no\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSuccess {
    pub user: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_granting_ticket: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
}

/// Failure body shared by validation and proxy responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFailure {
    pub code: ValidationErrorCode,
    pub description: String,
}

impl ProtocolFailure {
    pub fn new(code: ValidationErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// Body of a validation endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceResponse {
    AuthenticationSuccess(AuthenticationSuccess),
    AuthenticationFailure(ProtocolFailure),
}

/// Body of a `/proxy` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyResponse {
    #[serde(rename_all = "camelCase")]
    ProxySuccess { proxy_ticket: String },
    ProxyFailure(ProtocolFailure),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    service_response: T,
}

impl ServiceResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AuthenticationSuccess(_))
    }

    pub fn render(&self, format: ResponseFormat) -> String {
        match format {
            ResponseFormat::Xml => self.to_xml(),
            ResponseFormat::Json => to_json(self),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = XmlBuilder::open();
        match self {
            Self::AuthenticationSuccess(success) => {
                xml.start("cas:authenticationSuccess");
                xml.text_element("cas:user", &success.user);
                let attributes: Vec<_> = success
                    .attributes
                    .iter()
                    .filter(|(name, _)| is_xml_name(name))
                    .collect();
                if !attributes.is_empty() {
                    xml.start("cas:attributes");
                    for (name, values) in attributes {
                        let element = format!("cas:{name}");
                        for value in values {
                            xml.text_element(&element, value);
                        }
                    }
                    xml.end("cas:attributes");
                }
                if let Some(iou) = &success.proxy_granting_ticket {
                    xml.text_element("cas:proxyGrantingTicket", iou);
                }
                if !success.proxies.is_empty() {
                    xml.start("cas:proxies");
                    for proxy in &success.proxies {
                        xml.text_element("cas:proxy", proxy);
                    }
                    xml.end("cas:proxies");
                }
                xml.end("cas:authenticationSuccess");
            }
            Self::AuthenticationFailure(failure) => {
                xml.failure("cas:authenticationFailure", failure);
            }
        }
        xml.close()
    }

    /// Parse a JSON rendering back into a response.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Envelope<Self>>(body).map(|e| e.service_response)
    }
}

impl ProxyResponse {
    pub fn render(&self, format: ResponseFormat) -> String {
        match format {
            ResponseFormat::Xml => self.to_xml(),
            ResponseFormat::Json => to_json(self),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = XmlBuilder::open();
        match self {
            Self::ProxySuccess { proxy_ticket } => {
                xml.start("cas:proxySuccess");
                xml.text_element("cas:proxyTicket", proxy_ticket);
                xml.end("cas:proxySuccess");
            }
            Self::ProxyFailure(failure) => xml.failure("cas:proxyFailure", failure),
        }
        xml.close()
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Envelope<Self>>(body).map(|e| e.service_response)
    }
}

fn to_json<T: Serialize>(body: &T) -> String {
    // Serializing plain maps and strings cannot fail.
    serde_json::to_string_pretty(&Envelope {
        service_response: body,
    })
    .unwrap_or_default()
}

/// Indented `cas:serviceResponse` document.
///
/// Writes go into a `Vec<u8>`, which cannot fail, so write results are
/// dropped.
struct XmlBuilder {
    writer: Writer<Vec<u8>>,
}

impl XmlBuilder {
    fn open() -> Self {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        let root = BytesStart::new("cas:serviceResponse")
            .with_attributes([("xmlns:cas", CAS_NAMESPACE)]);
        let _ = writer.write_event(Event::Start(root));
        Self { writer }
    }

    fn start(&mut self, name: &str) {
        let _ = self.writer.write_event(Event::Start(BytesStart::new(name)));
    }

    fn end(&mut self, name: &str) {
        let _ = self.writer.write_event(Event::End(BytesEnd::new(name)));
    }

    fn text_element(&mut self, name: &str, text: &str) {
        self.start(name);
        let _ = self.writer.write_event(Event::Text(BytesText::new(text)));
        self.end(name);
    }

    fn failure(&mut self, name: &str, failure: &ProtocolFailure) {
        let start = BytesStart::new(name).with_attributes([("code", failure.code.as_str())]);
        let _ = self.writer.write_event(Event::Start(start));
        let _ = self
            .writer
            .write_event(Event::Text(BytesText::new(&failure.description)));
        self.end(name);
    }

    fn close(mut self) -> String {
        self.end("cas:serviceResponse");
        let mut out = String::from_utf8_lossy(&self.writer.into_inner()).into_owned();
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use quick_xml::Reader;

    use super::*;

    fn assertion() -> Assertion {
        Assertion {
            principal: Principal::new("casuser").with_attribute("mail", "casuser@example.org"),
            service: Service::new("https://app.example.org"),
            authentication_date: Utc::now(),
            from_new_login: true,
            proxy_granting_ticket_iou: None,
            proxies: vec![],
        }
    }

    #[test]
    fn error_codes_render_as_cas_names() {
        assert_eq!(ValidationErrorCode::InvalidTicket.as_str(), "INVALID_TICKET");
        assert_eq!(
            serde_json::to_string(&ValidationErrorCode::UnauthorizedServiceProxy).unwrap(),
            r#""UNAUTHORIZED_SERVICE_PROXY""#
        );
    }

    #[test]
    fn v2_omits_attributes_by_default() {
        let success = assertion().to_success(ProtocolVersion::V2, false);
        assert!(success.attributes.is_empty());
        let success = assertion().to_success(ProtocolVersion::V2, true);
        assert_eq!(success.attributes["mail"], vec!["casuser@example.org"]);
    }

    #[test]
    fn v3_adds_authentication_metadata() {
        let success = assertion().to_success(ProtocolVersion::V3, false);
        assert_eq!(success.attributes["isFromNewLogin"], vec!["true"]);
        assert!(success.attributes.contains_key("authenticationDate"));
        assert!(success.attributes.contains_key("mail"));
    }

    #[test]
    fn success_xml() {
        let mut assertion = assertion();
        assertion.proxies = vec![Service::new("https://proxy.example.org/cb")];
        assertion.proxy_granting_ticket_iou = Some("PGTIOU-1-x-node".to_string());
        let xml = ServiceResponse::AuthenticationSuccess(
            assertion.to_success(ProtocolVersion::V3, false),
        )
        .to_xml();
        assert!(xml.starts_with("<cas:serviceResponse xmlns:cas=\"http://www.yale.edu/tp/cas\">"));
        assert!(xml.contains("<cas:user>casuser</cas:user>"));
        assert!(xml.contains("<cas:mail>casuser@example.org</cas:mail>"));
        assert!(xml.contains("<cas:proxyGrantingTicket>PGTIOU-1-x-node</cas:proxyGrantingTicket>"));
        assert!(xml.contains("<cas:proxy>https://proxy.example.org/cb</cas:proxy>"));
    }

    const INJECTED_NAME: &str = "x>evil</cas:x><cas:user>admin</cas:user><cas:y";

    /// Text of every `element` in `xml`, read back with a real parser.
    fn element_texts(xml: &str, element: &str) -> Vec<String> {
        let mut reader = Reader::from_str(xml);
        let mut inside = false;
        let mut texts = Vec::new();
        loop {
            match reader.read_event().expect("well-formed XML") {
                Event::Start(e) => inside = e.name().as_ref() == element.as_bytes(),
                Event::Text(t) if inside => texts.push(t.unescape().unwrap().into_owned()),
                Event::End(_) => inside = false,
                Event::Eof => break,
                _ => {}
            }
        }
        texts
    }

    #[test]
    fn attribute_names_cannot_inject_elements() {
        let mut assertion = assertion();
        assertion.principal = assertion.principal.with_attribute(INJECTED_NAME, "1");
        let response =
            ServiceResponse::AuthenticationSuccess(assertion.to_success(ProtocolVersion::V2, true));

        let xml = response.to_xml();
        assert_eq!(element_texts(&xml, "cas:user"), vec!["casuser"]);
        assert_eq!(element_texts(&xml, "cas:mail"), vec!["casuser@example.org"]);

        // Both renderings carry the same attributes.
        let json: serde_json::Value =
            serde_json::from_str(&response.render(ResponseFormat::Json)).unwrap();
        let attributes = json["serviceResponse"]["authenticationSuccess"]["attributes"]
            .as_object()
            .unwrap();
        assert_eq!(attributes.keys().collect::<Vec<_>>(), vec!["mail"]);
    }

    #[test]
    fn xml_skips_unrenderable_names_in_built_responses() {
        let mut success = assertion().to_success(ProtocolVersion::V2, true);
        success
            .attributes
            .insert(INJECTED_NAME.to_string(), vec!["1".to_string()]);
        let xml = ServiceResponse::AuthenticationSuccess(success).to_xml();
        assert_eq!(element_texts(&xml, "cas:user"), vec!["casuser"]);
        assert!(!xml.contains("admin"));
    }

    #[test]
    fn xml_output_is_indented_document() {
        let xml = ProxyResponse::ProxySuccess {
            proxy_ticket: "PT-1-x-node".to_string(),
        }
        .to_xml();
        assert_eq!(
            xml,
            "<cas:serviceResponse xmlns:cas=\"http://www.yale.edu/tp/cas\">\n    \
             <cas:proxySuccess>\n        \
             <cas:proxyTicket>PT-1-x-node</cas:proxyTicket>\n    \
             </cas:proxySuccess>\n\
             </cas:serviceResponse>\n"
        );
    }

    #[test]
    fn failure_xml_escapes_description() {
        let xml = ServiceResponse::AuthenticationFailure(ProtocolFailure::new(
            ValidationErrorCode::InvalidService,
            "ticket <ST-1> does not match",
        ))
        .to_xml();
        assert!(xml.contains("<cas:authenticationFailure code=\"INVALID_SERVICE\">"));
        assert!(xml.contains("ticket &lt;ST-1&gt; does not match"));
    }

    #[test]
    fn json_mirrors_xml_content() {
        let response =
            ServiceResponse::AuthenticationSuccess(assertion().to_success(ProtocolVersion::V2, true));
        let json: serde_json::Value =
            serde_json::from_str(&response.render(ResponseFormat::Json)).unwrap();
        let success = &json["serviceResponse"]["authenticationSuccess"];
        assert_eq!(success["user"], "casuser");
        assert_eq!(success["attributes"]["mail"][0], "casuser@example.org");
        assert!(success.get("proxies").is_none());

        let parsed = ServiceResponse::from_json(&response.render(ResponseFormat::Json)).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn json_failure_shape() {
        let response = ServiceResponse::AuthenticationFailure(ProtocolFailure::new(
            ValidationErrorCode::InvalidTicket,
            "not recognized",
        ));
        let json: serde_json::Value =
            serde_json::from_str(&response.render(ResponseFormat::Json)).unwrap();
        assert_eq!(
            json["serviceResponse"]["authenticationFailure"]["code"],
            "INVALID_TICKET"
        );
    }

    #[test]
    fn proxy_responses() {
        let ok = ProxyResponse::ProxySuccess {
            proxy_ticket: "PT-1-x-node".to_string(),
        };
        assert!(ok.to_xml().contains("<cas:proxyTicket>PT-1-x-node</cas:proxyTicket>"));
        let json: serde_json::Value = serde_json::from_str(&ok.render(ResponseFormat::Json)).unwrap();
        assert_eq!(json["serviceResponse"]["proxySuccess"]["proxyTicket"], "PT-1-x-node");

        let failed = ProxyResponse::ProxyFailure(ProtocolFailure::new(
            ValidationErrorCode::InvalidRequest,
            "missing pgt",
        ));
        assert!(failed.to_xml().contains("<cas:proxyFailure code=\"INVALID_REQUEST\">"));
    }

    #[test]
    fn format_param() {
        assert_eq!(ResponseFormat::from_param(Some("JSON")), ResponseFormat::Json);
        assert_eq!(ResponseFormat::from_param(Some("xml")), ResponseFormat::Xml);
        assert_eq!(ResponseFormat::from_param(None), ResponseFormat::Xml);
    }

    #[test]
    fn cas1_body() {
        assert_eq!(assertion().to_cas1(), "yes\ncasuser\n");
    }
}
