use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::parser::types::value_to_string;

/// Protocol version stamped on every outbound message
pub const PROTOCOL_VERSION: u32 = 1;

/// Message discriminator carried in the `mtcommand` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtCommand {
    Play,
    Ping,
    Record,
}

impl MtCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MtCommand::Play => "PLAY",
            MtCommand::Ping => "PING",
            MtCommand::Record => "RECORD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAY" => Some(MtCommand::Play),
            "PING" => Some(MtCommand::Ping),
            "RECORD" => Some(MtCommand::Record),
            _ => None,
        }
    }

    /// Read the discriminator out of an inbound JSON body
    pub fn of(json: &Value) -> Option<Self> {
        json.get("mtcommand").and_then(Value::as_str).and_then(Self::parse)
    }
}

impl fmt::Display for MtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrap a payload object with `mtversion`, `mtcommand` and `timestamp`.
pub fn envelope(kind: MtCommand, payload: Value) -> Value {
    let mut obj = match payload {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    obj.insert("mtversion".into(), PROTOCOL_VERSION.into());
    obj.insert("mtcommand".into(), kind.as_str().into());
    obj.insert(
        "timestamp".into(),
        chrono::Utc::now().timestamp_millis().into(),
    );
    Value::Object(obj)
}

/// PING payload. Recording on carries where the agent should post RECORD messages.
pub fn ping_payload(record: Option<(&str, u16)>) -> Value {
    match record {
        Some((host, port)) if !host.is_empty() => json!({
            "record": "ON",
            "recordhost": host,
            "recordport": port,
        }),
        Some(_) => json!({ "record": "ON" }),
        None => json!({ "record": "OFF" }),
    }
}

/// Effective timings sent along with a PLAY message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    pub timeout_ms: u64,
    pub thinktime_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Ok,
    Failure,
    Error,
}

impl ResponseStatus {
    /// `OK`, `FAILURE` (or `FAIL`) case-insensitively; anything else is an error.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "OK" => ResponseStatus::Ok,
            "FAILURE" | "FAIL" => ResponseStatus::Failure,
            _ => ResponseStatus::Error,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Ok => f.write_str("OK"),
            ResponseStatus::Failure => f.write_str("FAILURE"),
            ResponseStatus::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub expected: String,
    pub actual: String,
    pub success: bool,
}

/// Agent identity returned by PING
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PingInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtversion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
}

impl PingInfo {
    /// OK reply carrying these identity fields in its `message` object
    pub fn into_response(self) -> Response {
        let body = json!({ "result": "OK", "message": &self });
        Response::ok(None::<String>).with_body(body)
    }
}

/// Outcome of one message sent to an agent (or served by a JsonServer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    pub message: Option<String>,
    pub warning: Option<String>,
    /// Base64 PNG
    pub screenshot: Option<String>,
    pub verify: Option<VerifyResult>,
    pub metrics: Option<Value>,
    /// Body as it appears on the wire: set when decoded, or to send a custom
    /// reply. Cleared by the `with_*` builders.
    #[serde(skip)]
    pub body: Option<Value>,
}

impl Default for Response {
    fn default() -> Self {
        Self::ok(None::<String>)
    }
}

impl Response {
    fn with_status(status: ResponseStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            warning: None,
            screenshot: None,
            verify: None,
            metrics: None,
            body: None,
        }
    }

    pub fn ok(message: impl Into<Option<String>>) -> Self {
        Self::with_status(ResponseStatus::Ok, message.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Failure, Some(message.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Error, Some(message.into()))
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self.body = None;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self.body = None;
        self
    }

    pub fn with_screenshot(mut self, screenshot: impl Into<String>) -> Self {
        self.screenshot = Some(screenshot.into());
        self.body = None;
        self
    }

    pub fn with_verify(mut self, verify: VerifyResult) -> Self {
        self.verify = Some(verify);
        self.body = None;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn message_or_empty(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// Decode an HTTP reply from an agent.
    ///
    /// Non-200 is always an error. A 200 with no body is OK. Otherwise the
    /// `result` field (or `status`) decides, and `message` may be a plain
    /// string or an object carrying `message`, `warning` and `screenshot`.
    pub fn from_http(code: u16, body: Option<&str>) -> Self {
        let body = body.filter(|b| !b.trim().is_empty());
        let json = body.and_then(|b| serde_json::from_str::<Value>(b).ok());

        if code != 200 {
            let mut resp = Self::with_status(ResponseStatus::Error, None);
            match json.as_ref() {
                Some(j) if j.get("message").is_some() => resp.read_message(j),
                _ => resp.message = body.map(str::to_string),
            }
            resp.body = json;
            return resp;
        }

        let Some(body) = body else {
            return Self::ok(None::<String>);
        };

        let Some(j) = json.filter(Value::is_object) else {
            return Self::with_status(ResponseStatus::Error, Some(body.to_string()));
        };

        let status = j
            .get("result")
            .or_else(|| j.get("status"))
            .and_then(Value::as_str)
            .map(ResponseStatus::parse)
            .unwrap_or(ResponseStatus::Error);
        let mut resp = Self::with_status(status, None);
        resp.read_message(&j);
        resp.body = Some(j);
        resp
    }

    fn read_message(&mut self, json: &Value) {
        let source = match json.get("message") {
            Some(Value::Object(_)) => json.get("message"),
            Some(Value::String(s)) => {
                self.message = Some(s.clone());
                Some(json)
            }
            Some(other) if !other.is_null() => {
                self.message = Some(value_to_string(other));
                Some(json)
            }
            _ => Some(json),
        };
        let Some(source) = source else { return };

        if let Some(Value::String(m)) = source.get("message") {
            self.message = Some(m.clone());
        }
        self.warning = source.get("warning").and_then(Value::as_str).map(String::from);
        self.screenshot = source
            .get("screenshot")
            .or_else(|| source.get("image"))
            .and_then(Value::as_str)
            .map(String::from);
        self.verify = source
            .get("verify")
            .or_else(|| json.get("verify"))
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        self.metrics = source
            .get("metrics")
            .or_else(|| json.get("metrics"))
            .cloned();
    }

    /// Encode as a reply body.
    pub fn to_json(&self) -> Value {
        if let Some(body) = &self.body {
            return body.clone();
        }
        let mut out = Map::new();
        out.insert("result".into(), self.status.to_string().into());

        let extras = self.warning.is_some()
            || self.screenshot.is_some()
            || self.verify.is_some()
            || self.metrics.is_some();
        if extras {
            let mut msg = Map::new();
            if let Some(m) = &self.message {
                msg.insert("message".into(), m.clone().into());
            }
            if let Some(w) = &self.warning {
                msg.insert("warning".into(), w.clone().into());
            }
            if let Some(s) = &self.screenshot {
                msg.insert("screenshot".into(), s.clone().into());
            }
            if let Some(v) = &self.verify {
                msg.insert("verify".into(), json!(v));
            }
            if let Some(m) = &self.metrics {
                msg.insert("metrics".into(), m.clone());
            }
            out.insert("message".into(), Value::Object(msg));
        } else if let Some(m) = &self.message {
            out.insert("message".into(), m.clone().into());
        }
        Value::Object(out)
    }

    /// Agent identity fields from a PING reply, read from the `message`
    /// object or from the top level.
    pub fn ping_info(&self) -> Option<PingInfo> {
        let body = self.body.as_ref()?;
        let source = body.get("message").filter(|m| m.is_object()).unwrap_or(body);
        let field = |k: &str| source.get(k).map(value_to_string);
        let info = PingInfo {
            os: field("os"),
            mtversion: field("mtversion"),
            record: field("record"),
        };
        if info == PingInfo::default() {
            None
        } else {
            Some(info)
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message.as_deref() {
            Some(m) if !m.is_empty() => write!(f, "{} : {}", self.status, m),
            _ => write!(f, "{}", self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_stamps_fields() {
        let json = envelope(MtCommand::Play, json!({"action": "Tap"}));
        assert_eq!(json["mtcommand"], "PLAY");
        assert_eq!(json["mtversion"], 1);
        assert_eq!(json["action"], "Tap");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_ping_payload() {
        assert_eq!(ping_payload(None), json!({"record": "OFF"}));
        assert_eq!(
            ping_payload(Some(("10.0.2.2", 16861))),
            json!({"record": "ON", "recordhost": "10.0.2.2", "recordport": 16861})
        );
    }

    #[test]
    fn test_status_aliases() {
        assert_eq!(ResponseStatus::parse("ok"), ResponseStatus::Ok);
        assert_eq!(ResponseStatus::parse("FAIL"), ResponseStatus::Failure);
        assert_eq!(ResponseStatus::parse("failure"), ResponseStatus::Failure);
        assert_eq!(ResponseStatus::parse("bogus"), ResponseStatus::Error);
    }

    #[test]
    fn test_from_http_non_200() {
        let resp = Response::from_http(500, Some("boom"));
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(resp.message.as_deref(), Some("boom"));

        let resp = Response::from_http(404, Some(r#"{"message":{"message":"nope"}}"#));
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(resp.message.as_deref(), Some("nope"));
    }

    #[test]
    fn test_from_http_empty_body_is_ok() {
        assert_eq!(Response::from_http(200, None).status, ResponseStatus::Ok);
        assert_eq!(Response::from_http(200, Some("  ")).status, ResponseStatus::Ok);
    }

    #[test]
    fn test_from_http_result_field() {
        let resp = Response::from_http(200, Some(r#"{"result":"FAILURE","message":"Unable to find Button(OK)"}"#));
        assert_eq!(resp.status, ResponseStatus::Failure);
        assert_eq!(resp.message.as_deref(), Some("Unable to find Button(OK)"));

        let resp = Response::from_http(200, Some(r#"{"status":"FAIL","message":"x"}"#));
        assert_eq!(resp.status, ResponseStatus::Failure);

        let resp = Response::from_http(200, Some(r#"{"message":"no result"}"#));
        assert_eq!(resp.status, ResponseStatus::Error);
    }

    #[test]
    fn test_from_http_message_object() {
        let resp = Response::from_http(
            200,
            Some(r#"{"result":"OK","message":{"message":"hi","warning":"w","image":"aGk=","verify":{"expected":"a","actual":"b","success":false}}}"#),
        );
        assert!(resp.is_ok());
        assert_eq!(resp.message.as_deref(), Some("hi"));
        assert_eq!(resp.warning.as_deref(), Some("w"));
        assert_eq!(resp.screenshot.as_deref(), Some("aGk="));
        assert!(!resp.verify.unwrap().success);
    }

    #[test]
    fn test_from_http_garbage_body_is_error() {
        let resp = Response::from_http(200, Some("not json"));
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(resp.message.as_deref(), Some("not json"));
    }

    #[test]
    fn test_ping_info() {
        let resp = Response::from_http(
            200,
            Some(r#"{"result":"OK","message":{"os":"OS","mtversion":"VER","record":"REC"}}"#),
        );
        assert_eq!(
            resp.ping_info(),
            Some(PingInfo {
                os: Some("OS".into()),
                mtversion: Some("VER".into()),
                record: Some("REC".into()),
            })
        );
        assert!(Response::ok(Some("x".to_string())).ping_info().is_none());

        let info = PingInfo {
            os: Some("Android".into()),
            mtversion: Some("2.0".into()),
            record: Some("OFF".into()),
        };
        let body = info.clone().into_response().to_json();
        assert_eq!(body["message"]["os"], "Android");
        let decoded = Response::from_http(200, Some(&body.to_string()));
        assert_eq!(decoded.ping_info(), Some(info));
    }

    #[test]
    fn test_to_json_shapes() {
        assert_eq!(
            Response::failure("bad").to_json(),
            json!({"result": "FAILURE", "message": "bad"})
        );
        let with_extras = Response::error("e").with_screenshot("AAAA").to_json();
        assert_eq!(with_extras["message"]["message"], "e");
        assert_eq!(with_extras["message"]["screenshot"], "AAAA");
    }

    #[test]
    fn test_display() {
        assert_eq!(Response::failure("bad").to_string(), "FAILURE : bad");
        assert_eq!(Response::default().to_string(), "OK");
    }
}
