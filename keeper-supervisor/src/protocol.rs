//! Status socket protocol: one JSON object per line in each direction.
//!
//! ```text
//! -> {"cmd":"status"}            <- {"ok":true,"data":{"phase":"idle",...}}
//! -> {"cmd":"check"}             <- {"ok":true,"data":"started"}
//! -> {"cmd":"stop"}              <- {"ok":true}
//! -> {"cmd":"reboot"}            <- {"ok":false,"error":"unknown command 'reboot'"}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::{CheckReply, StatusSnapshot};
use crate::error::{io_err, SupervisorError};

const STARTUP_ATTEMPTS: u32 = 5;
const STARTUP_BACKOFF: Duration = Duration::from_millis(100);

/// Operator request, one per line on the wire as `{"cmd":"<name>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum SupervisorRequest {
    Status,
    Check,
    Stop,
}

impl SupervisorRequest {
    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Check => "check",
            Self::Stop => "stop",
        }
    }

    /// Decode one request line. The error text goes back to the client as is.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(line).map_err(|err| format!("invalid request JSON: {err}"))?;
        match value.get("cmd").and_then(Value::as_str) {
            Some("status") => Ok(Self::Status),
            Some("check") => Ok(Self::Check),
            Some("stop") => Ok(Self::Stop),
            Some(other) => Err(format!("unknown command '{other}'")),
            None => Err("request has no \"cmd\" field".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SupervisorResponse {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Payload of a successful response decoded as `T`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, SupervisorError> {
        if !self.ok {
            return Err(SupervisorError::Protocol(
                self.error
                    .unwrap_or_else(|| "supervisor refused the request".to_string()),
            ));
        }
        Ok(serde_json::from_value(self.data.unwrap_or(Value::Null))?)
    }
}

/// Blocking client for the status socket, one connection per request.
#[derive(Debug, Clone)]
pub struct SupervisorClient {
    socket: PathBuf,
}

impl SupervisorClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Current coordinator state. A supervisor that is still binding its
    /// socket gets a few short retries before counting as not running.
    pub fn status(&self) -> Result<StatusSnapshot, SupervisorError> {
        let mut attempt = 1;
        loop {
            match self.call(SupervisorRequest::Status) {
                Err(SupervisorError::NotRunning { .. }) if attempt < STARTUP_ATTEMPTS => {
                    attempt += 1;
                    std::thread::sleep(STARTUP_BACKOFF);
                }
                other => return other,
            }
        }
    }

    pub fn check(&self) -> Result<CheckReply, SupervisorError> {
        self.call(SupervisorRequest::Check)
    }

    pub fn stop(&self) -> Result<(), SupervisorError> {
        self.call(SupervisorRequest::Stop)
    }

    pub fn call<T: DeserializeOwned>(&self, request: SupervisorRequest) -> Result<T, SupervisorError> {
        self.exchange(request)?.into_result()
    }

    /// Write one request line and read one response line.
    pub fn exchange(&self, request: SupervisorRequest) -> Result<SupervisorResponse, SupervisorError> {
        let stream = self.connect()?;
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        (&stream)
            .write_all(line.as_bytes())
            .and_then(|()| (&stream).flush())
            .map_err(|e| io_err(&self.socket, e))?;

        let mut reply = String::new();
        let read = BufReader::new(&stream)
            .read_line(&mut reply)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(SupervisorError::Protocol(format!(
                "supervisor hung up before answering '{}'",
                request.name()
            )));
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }

    fn connect(&self) -> Result<UnixStream, SupervisorError> {
        let not_running = || SupervisorError::NotRunning {
            socket: self.socket.clone(),
        };
        if !self.socket.exists() {
            return Err(not_running());
        }
        UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                not_running()
            }
            _ => io_err(&self.socket, err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_socket_means_not_running() {
        let tmp = TempDir::new().unwrap();
        let client = SupervisorClient::new(tmp.path().join("supervisor.sock"));
        let err = client.stop().unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning { .. }));
    }

    #[test]
    fn request_lines_use_cmd_tag() {
        assert_eq!(
            serde_json::to_string(&SupervisorRequest::Check).unwrap(),
            r#"{"cmd":"check"}"#
        );
        assert_eq!(
            SupervisorRequest::parse_line(r#"{"cmd":"stop"}"#),
            Ok(SupervisorRequest::Stop)
        );
        assert_eq!(
            SupervisorRequest::parse_line(r#"{"cmd":"reboot"}"#),
            Err("unknown command 'reboot'".to_string())
        );
        assert!(SupervisorRequest::parse_line("{not json")
            .unwrap_err()
            .starts_with("invalid request JSON"));
    }

    #[test]
    fn error_response_surfaces_message() {
        let err = SupervisorResponse::error("unknown command 'x'")
            .into_result::<Value>()
            .unwrap_err();
        assert_eq!(err.to_string(), "supervisor protocol error: unknown command 'x'");
    }

    #[test]
    fn check_reply_decodes_from_response() {
        let response = SupervisorResponse::ok(Some(Value::from("already_running")));
        assert_eq!(
            response.into_result::<CheckReply>().unwrap(),
            CheckReply::AlreadyRunning
        );
    }
}
