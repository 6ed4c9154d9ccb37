//! Minimal JSON-RPC / XML-RPC transport for backend X.
//!
//! Only the handful of calls the driver needs are supported:
//! `session.login_with_password`, `VM.get_by_name_label`,
//! `VM.get_power_state`, `VM.clean_shutdown`, `VM.hard_shutdown`,
//! `VM.resume`. Results are normalized to [`serde_json::Value`]
//! regardless of wire format so the backend doesn't need to care which
//! transport it's using.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::{json, Value};

use crate::error::{BackendFailure, Result};

/// Which RPC payload encoding to speak to backend X.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcTransport {
    JsonRpc,
    XmlRpc,
}

pub struct RpcClient {
    http: reqwest::Client,
    uri: String,
    transport: RpcTransport,
}

impl RpcClient {
    pub fn new(uri: impl Into<String>, transport: RpcTransport) -> Self {
        Self {
            http: reqwest::Client::new(),
            uri: uri.into(),
            transport,
        }
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        match self.transport {
            RpcTransport::JsonRpc => self.call_json(method, params).await,
            RpcTransport::XmlRpc => self.call_xml(method, params).await,
        }
    }

    async fn call_json(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let resp: Value = self
            .http
            .post(&self.uri)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendFailure::new(format!("xapi json-rpc {method}"), e))?
            .json()
            .await
            .map_err(|e| BackendFailure::new(format!("xapi json-rpc {method} decode"), e))?;

        if let Some(err) = resp.get("error") {
            if !err.is_null() {
                return Err(BackendFailure::new(format!("xapi json-rpc {method}"), err));
            }
        }

        resp.get("result")
            .cloned()
            .ok_or_else(|| BackendFailure::new(format!("xapi json-rpc {method}"), "missing result"))
    }

    async fn call_xml(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let body = build_xmlrpc_request(method, &params);

        let text = self
            .http
            .post(&self.uri)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| BackendFailure::new(format!("xapi xml-rpc {method}"), e))?
            .text()
            .await
            .map_err(|e| BackendFailure::new(format!("xapi xml-rpc {method} decode"), e))?;

        parse_xmlrpc_response(&text)
            .map_err(|e| BackendFailure::new(format!("xapi xml-rpc {method} parse"), e))
    }
}

fn build_xmlrpc_request(method: &str, params: &[Value]) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version='1.0'?>\n<methodCall>\n");
    xml.push_str(&format!("  <methodName>{method}</methodName>\n"));
    xml.push_str("  <params>\n");
    for param in params {
        xml.push_str("    <param><value>");
        xml.push_str(&json_to_xmlrpc_value(param));
        xml.push_str("</value></param>\n");
    }
    xml.push_str("  </params>\n</methodCall>\n");
    xml
}

fn json_to_xmlrpc_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("<string>{}</string>", xml_escape(s)),
        Value::Bool(b) => format!("<boolean>{}</boolean>", if *b { 1 } else { 0 }),
        Value::Array(items) => {
            let inner: String = items
                .iter()
                .map(|v| format!("<value>{}</value>", json_to_xmlrpc_value(v)))
                .collect();
            format!("<array><data>{inner}</data></array>")
        }
        other => format!("<string>{}</string>", xml_escape(&other.to_string())),
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Parse an XML-RPC `methodResponse`, extracting the single return value
/// (or raising on a `<fault>`). Recurses through nested `<array>`/`<struct>`
/// shapes rather than flattening everything to text.
fn parse_xmlrpc_response(xml: &str) -> std::result::Result<Value, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_fault = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Start(e) if e.local_name().as_ref() == b"fault" => in_fault = true,
            Event::Start(e) if e.local_name().as_ref() == b"value" => {
                let value = parse_value(&mut reader, &mut buf)?;
                if in_fault {
                    let message = value
                        .get("faultString")
                        .and_then(|v| v.as_str())
                        .unwrap_or("xml-rpc fault")
                        .to_string();
                    return Err(message);
                }
                return Ok(value);
            }
            Event::Eof => return Err("no value in xml-rpc response".to_string()),
            _ => {}
        }
        buf.clear();
    }
}

/// Parses the contents of a `<value>` element, already past its opening
/// tag. A bare value with no type tag is a string, per the XML-RPC spec.
fn parse_value(reader: &mut Reader<&[u8]>, buf: &mut Vec<u8>) -> std::result::Result<Value, String> {
    let mut text_buf = String::new();
    let mut typed: Option<Value> = None;

    loop {
        match reader.read_event_into(buf).map_err(|e| e.to_string())? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                typed = Some(match name.as_slice() {
                    b"array" => Value::Array(parse_array(reader, buf)?),
                    b"struct" => Value::Object(parse_struct(reader, buf)?),
                    b"int" | b"i4" | b"i8" => {
                        let text = read_text_until(reader, buf, &name)?;
                        Value::from(text.trim().parse::<i64>().map_err(|e| e.to_string())?)
                    }
                    b"double" => {
                        let text = read_text_until(reader, buf, &name)?;
                        Value::from(text.trim().parse::<f64>().map_err(|e| e.to_string())?)
                    }
                    b"boolean" => {
                        let text = read_text_until(reader, buf, &name)?;
                        Value::Bool(text.trim() == "1")
                    }
                    _ => Value::String(read_text_until(reader, buf, &name)?),
                });
            }
            Event::Text(t) => {
                text_buf.push_str(&t.unescape().map_err(|e| e.to_string())?.into_owned());
            }
            Event::End(e) if e.local_name().as_ref() == b"value" => {
                return Ok(typed.unwrap_or(Value::String(text_buf)));
            }
            Event::Eof => return Err("unexpected eof parsing value".to_string()),
            _ => {}
        }
        buf.clear();
    }
}

/// Reads accumulated text up to the matching end tag `tag` (e.g. `int`,
/// `name`), for leaf elements that hold a single text node.
fn read_text_until(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
    tag: &[u8],
) -> std::result::Result<String, String> {
    let mut text = String::new();
    loop {
        match reader.read_event_into(buf).map_err(|e| e.to_string())? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(|e| e.to_string())?.into_owned()),
            Event::End(e) if e.local_name().as_ref() == tag => return Ok(text),
            Event::Eof => return Err("unexpected eof reading text".to_string()),
            _ => {}
        }
        buf.clear();
    }
}

/// Parses `<data><value>...</value>...</data>` inside an `<array>`,
/// already past the `<array>` opening tag.
fn parse_array(reader: &mut Reader<&[u8]>, buf: &mut Vec<u8>) -> std::result::Result<Vec<Value>, String> {
    let mut items = Vec::new();
    loop {
        match reader.read_event_into(buf).map_err(|e| e.to_string())? {
            Event::Start(e) if e.local_name().as_ref() == b"value" => {
                items.push(parse_value(reader, buf)?);
            }
            Event::End(e) if e.local_name().as_ref() == b"array" => return Ok(items),
            Event::Eof => return Err("unexpected eof in array".to_string()),
            _ => {}
        }
        buf.clear();
    }
}

/// Parses `<member><name>..</name><value>..</value></member>...` inside a
/// `<struct>`, already past the `<struct>` opening tag.
fn parse_struct(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
) -> std::result::Result<serde_json::Map<String, Value>, String> {
    let mut members = serde_json::Map::new();
    let mut pending_name: Option<String> = None;
    loop {
        match reader.read_event_into(buf).map_err(|e| e.to_string())? {
            Event::Start(e) if e.local_name().as_ref() == b"name" => {
                pending_name = Some(read_text_until(reader, buf, b"name")?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"value" => {
                let value = parse_value(reader, buf)?;
                members.insert(pending_name.take().unwrap_or_default(), value);
            }
            Event::End(e) if e.local_name().as_ref() == b"struct" => return Ok(members),
            Event::Eof => return Err("unexpected eof in struct".to_string()),
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_login_request_with_string_params() {
        let xml = build_xmlrpc_request(
            "session.login_with_password",
            &[json!("root"), json!("hunter2")],
        );
        assert!(xml.contains("session.login_with_password"));
        assert!(xml.contains("<string>root</string>"));
    }

    #[test]
    fn parses_fault_as_error() {
        let xml = "<methodResponse><fault><value><struct><member><name>faultString</name><value>boom</value></member></struct></value></fault></methodResponse>";
        assert!(parse_xmlrpc_response(xml).is_err());
    }

    #[test]
    fn parses_array_of_strings_as_a_json_array() {
        let xml = "<methodResponse><params><param><value><array><data>\
            <value><string>OpaqueRef:1</string></value>\
            <value><string>OpaqueRef:2</string></value>\
            </data></array></value></param></params></methodResponse>";
        let value = parse_xmlrpc_response(xml).unwrap();
        let refs = value.as_array().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].as_str().unwrap(), "OpaqueRef:1");
    }

    #[test]
    fn parses_nested_struct_inside_array() {
        let xml = "<methodResponse><params><param><value><array><data>\
            <value><struct>\
              <member><name>uuid</name><value><string>abc-123</string></value></member>\
              <member><name>running</name><value><boolean>1</boolean></value></member>\
            </struct></value>\
            </data></array></value></param></params></methodResponse>";
        let value = parse_xmlrpc_response(xml).unwrap();
        let first = &value.as_array().unwrap()[0];
        assert_eq!(first.get("uuid").unwrap().as_str().unwrap(), "abc-123");
        assert_eq!(first.get("running").unwrap().as_bool().unwrap(), true);
    }
}
