use std::io::{BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;

use crate::content::images::{ImageUpload, UploadResult};
use crate::content::{Article, ArticleInput, ArticleUpdate, MutationResult};
use crate::protocol::{
    CountsResult, ListResult, RebuildResult, Request, Response, RpcError, RpcRequest,
    StatusResult, read_response, socket_path, write_message,
};

/// Client for communicating with the daemon
pub struct Client {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
    next_id: u64,
}

#[derive(Debug)]
pub enum ClientError {
    /// Could not connect to daemon
    NotRunning,
    /// IO error
    Io(std::io::Error),
    /// RPC error from daemon
    Rpc(RpcError),
    /// Invalid response
    InvalidResponse(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotRunning => write!(f, "daemon is not running"),
            ClientError::Io(e) => write!(f, "IO error: {}", e),
            ClientError::Rpc(e) => write!(f, "RPC error: {} (code {})", e.message, e.code),
            ClientError::InvalidResponse(s) => write!(f, "invalid response: {}", s),
        }
    }
}

impl std::error::Error for ClientError {}

fn is_not_running_io_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotFound
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    ) || matches!(
        err.raw_os_error(),
        Some(libc::ECONNREFUSED)
            | Some(libc::ENOENT)
            | Some(libc::ECONNABORTED)
            | Some(libc::ECONNRESET)
            | Some(libc::EPIPE)
            | Some(libc::ENOTCONN)
    )
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        if is_not_running_io_error(&e) {
            ClientError::NotRunning
        } else {
            ClientError::Io(e)
        }
    }
}

impl Client {
    /// Connect to the daemon
    pub fn connect() -> Result<Self, ClientError> {
        let path = socket_path();
        let stream = UnixStream::connect(&path)?;

        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
        })
    }

    /// Send a request and wait for response
    pub fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let rpc_request = RpcRequest::new(request, id);
        write_message(&mut self.writer, &rpc_request)?;
        self.writer.flush()?;

        match read_response(&mut self.reader)? {
            Ok(response) => Ok(response.result),
            Err(error) => Err(ClientError::Rpc(error.error)),
        }
    }

    /// Convenience: get status
    pub fn status(&mut self) -> Result<StatusResult, ClientError> {
        match self.call(Request::Status)? {
            Response::Status(s) => Ok(s),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Convenience: list records, optionally of one directory
    pub fn list(&mut self, directory: Option<&str>) -> Result<ListResult, ClientError> {
        match self.call(Request::List {
            directory: directory.map(str::to_string),
        })? {
            Response::List(l) => Ok(l),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Convenience: read one article
    pub fn get(&mut self, directory: &str, slug: &str) -> Result<Article, ClientError> {
        match self.call(Request::Get {
            directory: directory.to_string(),
            slug: slug.to_string(),
        })? {
            Response::Article(a) => Ok(a),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Convenience: create an article
    pub fn create(&mut self, input: ArticleInput) -> Result<MutationResult, ClientError> {
        self.mutate(Request::Create(input))
    }

    /// Convenience: update (and possibly move) an article
    pub fn update(&mut self, update: ArticleUpdate) -> Result<MutationResult, ClientError> {
        self.mutate(Request::Update(update))
    }

    /// Convenience: delete an article
    pub fn delete(&mut self, directory: &str, slug: &str) -> Result<MutationResult, ClientError> {
        self.mutate(Request::Delete {
            directory: directory.to_string(),
            slug: slug.to_string(),
        })
    }

    fn mutate(&mut self, request: Request) -> Result<MutationResult, ClientError> {
        match self.call(request)? {
            Response::Mutation(m) => Ok(m),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Convenience: rescan a directory
    pub fn rebuild(&mut self, directory: &str) -> Result<RebuildResult, ClientError> {
        match self.call(Request::Rebuild {
            directory: directory.to_string(),
        })? {
            Response::Rebuild(r) => Ok(r),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Convenience: article counts
    pub fn counts(&mut self) -> Result<CountsResult, ClientError> {
        match self.call(Request::Counts)? {
            Response::Counts(c) => Ok(c),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Convenience: upload an image
    pub fn upload_image(&mut self, upload: ImageUpload) -> Result<UploadResult, ClientError> {
        match self.call(Request::UploadImage(upload))? {
            Response::Upload(u) => Ok(u),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }

    /// Convenience: stop daemon
    pub fn stop(&mut self) -> Result<(), ClientError> {
        match self.call(Request::Stop)? {
            Response::Ok(()) => Ok(()),
            other => Err(ClientError::InvalidResponse(format!("{:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientError;

    #[test]
    fn maps_broken_pipe_to_not_running() {
        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(ClientError::from(err), ClientError::NotRunning));
    }

    #[test]
    fn keeps_unrelated_io_errors_as_io() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(ClientError::from(err), ClientError::Io(_)));
    }
}
