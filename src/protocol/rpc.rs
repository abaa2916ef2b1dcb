use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};

use super::messages::{Request, Response, RpcError};

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: Value,
}

/// JSON-RPC 2.0 success response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Response,
    pub id: Value,
}

/// JSON-RPC 2.0 error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: Value,
}

impl RpcRequest {
    pub fn new(request: Request, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            request,
            id: id.into(),
        }
    }
}

impl RpcResponse {
    pub fn new(result: Response, id: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result,
            id,
        }
    }
}

impl RpcErrorResponse {
    pub fn new(error: RpcError, id: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            error,
            id,
        }
    }
}

/// Write a JSON-RPC message as a single line (JSONL)
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> std::io::Result<()> {
    let json = serde_json::to_string(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}

/// Read a JSON-RPC request from a line
pub fn read_request<R: BufRead>(reader: &mut R) -> std::io::Result<Option<RpcRequest>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None); // EOF
    }
    let req: RpcRequest = serde_json::from_str(&line)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(req))
}

/// Read a JSON-RPC response (success or error) from a line
pub fn read_response<R: BufRead>(
    reader: &mut R,
) -> std::io::Result<Result<RpcResponse, RpcErrorResponse>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
    }

    // Try to parse as success first
    if let Ok(resp) = serde_json::from_str::<RpcResponse>(&line) {
        return Ok(Ok(resp));
    }

    // Try error response
    if let Ok(err) = serde_json::from_str::<RpcErrorResponse>(&line) {
        return Ok(Err(err));
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "invalid JSON-RPC response",
    ))
}
