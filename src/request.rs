// Request description types
// A logical call is described once and may be sent up to twice

use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Which attempt of a logical call is being sent.
/// A call may only be retried once, after a successful renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    RetryAfterRenewal,
}

impl Attempt {
    pub fn may_renew(self) -> bool {
        self == Attempt::First
    }
}

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    /// Raw bytes; the content type is left to the caller or the transport
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    /// multipart/form-data, rebuilt for every attempt
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Whether the JSON content type should be set for this body
    pub fn is_json(&self) -> bool {
        matches!(self, RequestBody::Empty | RequestBody::Json(_))
    }
}

/// One field of a multipart body
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

#[derive(Debug, Clone)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        mime: Option<String>,
        data: Bytes,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                file_name: file_name.into(),
                mime: mime.map(str::to_string),
                data: data.into(),
            },
        }
    }
}

/// Options of a logical call
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// Per-attempt deadline; the client default applies when unset
    pub timeout: Option<Duration>,
    /// Public calls carry no bearer token and never trigger a renewal
    pub public: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: RequestBody::Empty,
            headers: Vec::new(),
            query: Vec::new(),
            timeout: None,
            public: false,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Serialize any value as the JSON body
    pub fn json_from<T: Serialize>(self, body: &T) -> serde_json::Result<Self> {
        Ok(self.json(serde_json::to_value(body)?))
    }

    pub fn bytes(mut self, data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        self.body = RequestBody::Bytes {
            data: data.into(),
            content_type: content_type.map(str::to_string),
        };
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = RequestOptions::default();
        assert_eq!(options.method, Method::GET);
        assert!(matches!(options.body, RequestBody::Empty));
        assert!(options.timeout.is_none());
        assert!(!options.public);
    }

    #[test]
    fn test_builder() {
        let options = RequestOptions::post()
            .json(json!({"name": "Apples"}))
            .header("X-Store", "42")
            .query("page", "2")
            .timeout_ms(500)
            .public();

        assert_eq!(options.method, Method::POST);
        assert!(options.body.is_json());
        assert_eq!(options.headers, vec![("X-Store".to_string(), "42".to_string())]);
        assert_eq!(options.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(options.timeout, Some(Duration::from_millis(500)));
        assert!(options.public);
    }

    #[test]
    fn test_binary_bodies_are_not_json() {
        let upload = RequestOptions::post().multipart(vec![
            FormPart::text("name", "Bananas"),
            FormPart::file("image", "banana.png", Some("image/png"), vec![1u8, 2, 3]),
        ]);
        assert!(!upload.body.is_json());

        let raw = RequestOptions::put().bytes(vec![0u8; 4], None);
        assert!(!raw.body.is_json());
    }

    #[test]
    fn test_json_from_struct() {
        #[derive(Serialize)]
        struct Item {
            sku: &'static str,
            qty: u32,
        }

        let options = RequestOptions::post()
            .json_from(&Item { sku: "A1", qty: 3 })
            .unwrap();
        match options.body {
            RequestBody::Json(value) => assert_eq!(value, json!({"sku": "A1", "qty": 3})),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_attempt_may_renew_once() {
        assert!(Attempt::First.may_renew());
        assert!(!Attempt::RetryAfterRenewal.may_renew());
    }
}
