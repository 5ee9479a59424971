//! Problem-details rendering with Accept-based content negotiation.
//!
//! JSON is the default representation. XML is chosen only when the caller asks
//! for an XML media type and does not also ask for JSON.

use serde::{Deserialize, Serialize};
use tracing::error;

pub const PROBLEM_JSON: &str = "application/problem+json";
pub const PROBLEM_XML: &str = "application/problem+xml";

const JSON_TYPES: &[&str] = &["application/json", PROBLEM_JSON];
const XML_TYPES: &[&str] = &["application/xml", "text/xml", PROBLEM_XML];

/// Response representation for problem bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Representation {
    #[default]
    Json,
    Xml,
}

impl Representation {
    pub fn content_type(self) -> &'static str {
        match self {
            Representation::Json => PROBLEM_JSON,
            Representation::Xml => PROBLEM_XML,
        }
    }
}

/// RFC 7807 problem details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub title: String,
    pub detail: String,
    pub status: u16,
    pub instance: String,
    #[serde(rename = "type")]
    pub type_url: String,
}

#[derive(Serialize)]
#[serde(rename = "problem")]
struct XmlProblem<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    title: &'a str,
    detail: &'a str,
    status: u16,
    instance: &'a str,
    #[serde(rename = "type")]
    type_url: &'a str,
}

impl<'a> From<&'a ProblemDetails> for XmlProblem<'a> {
    fn from(p: &'a ProblemDetails) -> Self {
        Self {
            xmlns: "urn:ietf:rfc:7807",
            title: &p.title,
            detail: &p.detail,
            status: p.status,
            instance: &p.instance,
            type_url: &p.type_url,
        }
    }
}

/// Settings shared by every rendered problem body. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemSettings {
    /// Base of the `type` URL; the status code is appended as the last path segment.
    pub type_base_url: String,
}

impl Default for ProblemSettings {
    fn default() -> Self {
        Self {
            type_base_url: "https://httpstatuses.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseNegotiator {
    settings: ProblemSettings,
}

impl ResponseNegotiator {
    pub fn new(settings: ProblemSettings) -> Self {
        Self { settings }
    }

    /// Pick a representation from the raw `Accept` header values of a request.
    pub fn select_representation<'a, I>(&self, accept_values: I) -> Representation
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut accept_json = false;
        let mut accept_xml = false;
        for media in accept_values
            .into_iter()
            .flat_map(|v| v.split(','))
            .filter_map(media_type)
        {
            accept_json |= JSON_TYPES.iter().any(|t| media.eq_ignore_ascii_case(t));
            accept_xml |= XML_TYPES.iter().any(|t| media.eq_ignore_ascii_case(t));
        }

        if accept_xml && !accept_json {
            Representation::Xml
        } else {
            Representation::Json
        }
    }

    pub fn problem(
        &self,
        status: u16,
        title: &str,
        detail: &str,
        instance: &str,
    ) -> ProblemDetails {
        ProblemDetails {
            title: title.to_string(),
            detail: detail.to_string(),
            status,
            instance: instance.to_string(),
            type_url: format!(
                "{}/{}",
                self.settings.type_base_url.trim_end_matches('/'),
                status
            ),
        }
    }

    /// Serialize a problem body. A serialization failure is logged and yields an empty body.
    pub fn build_problem_body(
        &self,
        status: u16,
        title: &str,
        detail: &str,
        instance: &str,
        representation: Representation,
    ) -> String {
        let problem = self.problem(status, title, detail, instance);
        match representation {
            Representation::Json => render_or_empty(&problem, representation),
            Representation::Xml => render_or_empty(&XmlProblem::from(&problem), representation),
        }
    }
}

fn render_or_empty<T: Serialize>(value: &T, representation: Representation) -> String {
    let rendered = match representation {
        Representation::Json => serde_json::to_string(value).map_err(|e| e.to_string()),
        Representation::Xml => quick_xml::se::to_string(value).map_err(|e| e.to_string()),
    };
    rendered.unwrap_or_else(|e| {
        error!(?representation, "Unable to serialize problem detail: {}", e);
        String::new()
    })
}

/// Media type of one Accept entry, without parameters. None for blank entries.
fn media_type(entry: &str) -> Option<&str> {
    let media = entry.split(';').next().unwrap_or("").trim();
    if media.is_empty() {
        None
    } else {
        Some(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiator() -> ResponseNegotiator {
        ResponseNegotiator::default()
    }

    struct Unrepresentable;

    impl Serialize for Unrepresentable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    #[test]
    fn json_is_the_default() {
        let n = negotiator();
        assert_eq!(
            n.select_representation(Vec::<&str>::new()),
            Representation::Json
        );
        assert_eq!(n.select_representation(["*/*"]), Representation::Json);
        assert_eq!(n.select_representation(["text/csv"]), Representation::Json);
    }

    #[test]
    fn xml_only_when_json_is_absent() {
        let n = negotiator();
        assert_eq!(
            n.select_representation(["application/xml"]),
            Representation::Xml
        );
        assert_eq!(
            n.select_representation(["text/html, Application/XML;q=0.9"]),
            Representation::Xml
        );
        assert_eq!(
            n.select_representation(["application/json, application/xml"]),
            Representation::Json
        );
        assert_eq!(
            n.select_representation(["application/xml", "application/json;q=0.1"]),
            Representation::Json
        );
    }

    #[test]
    fn json_body_carries_all_fields() {
        let body = negotiator().build_problem_body(
            401,
            "Unauthorized",
            "You are not authorized to view this resource",
            "/keys",
            Representation::Json,
        );
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["status"], 401);
        assert_eq!(v["title"], "Unauthorized");
        assert_eq!(v["instance"], "/keys");
        assert_eq!(v["type"], "https://httpstatuses.com/401");
    }

    #[test]
    fn xml_body_is_a_problem_element() {
        let body = negotiator().build_problem_body(
            403,
            "Forbidden",
            "You are not authorized to view this resource",
            "/keys?a=<b>",
            Representation::Xml,
        );
        assert!(body.starts_with("<problem xmlns=\"urn:ietf:rfc:7807\">"));
        assert!(body.contains("<status>403</status>"));
        assert!(body.contains("<title>Forbidden</title>"));
        assert!(body.contains("<type>https://httpstatuses.com/403</type>"));
        assert!(body.contains("&lt;b&gt;"));
    }

    #[test]
    fn type_url_uses_configured_base() {
        let n = ResponseNegotiator::new(ProblemSettings {
            type_base_url: "https://errors.example.com/status/".into(),
        });
        assert_eq!(
            n.problem(404, "Not Found", "", "/x").type_url,
            "https://errors.example.com/status/404"
        );
    }

    #[test]
    fn serialization_failure_yields_empty_body() {
        assert_eq!(render_or_empty(&Unrepresentable, Representation::Json), "");
        assert_eq!(render_or_empty(&Unrepresentable, Representation::Xml), "");
    }
}
