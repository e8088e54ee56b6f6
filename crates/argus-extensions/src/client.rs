//! Scoped RPC clients.
//!
//! Each client is bound to one endpoint, used for one logical call, and
//! dropped. No pooling: a transport failure is observed at exactly the
//! call site that triggered it.

use crate::wire::{
    ExtensionList, ExtensionRequest, ExtensionResponse, ExtensionInfo, ManagerRequest, OptionList,
};
use argus_core::error::{ExtensionError, ExtensionStatus};
use argus_core::registry::{Broadcast, PluginRequest};
use interprocess::local_socket::{traits::Stream as _, GenericFilePath, Stream, ToFsName};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};

/// One connected request/reply channel.
struct Connection {
    reader: BufReader<Stream>,
}

impl Connection {
    fn open(addr: &str) -> Result<Self, ExtensionError> {
        let name = addr
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| ExtensionError::Transport(err.to_string()))?;
        let stream =
            Stream::connect(name).map_err(|err| ExtensionError::Transport(err.to_string()))?;
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    fn request<Req: Serialize, Reply: DeserializeOwned>(
        &mut self,
        request: &Req,
    ) -> Result<Reply, ExtensionError> {
        let mut frame = serde_json::to_string(request)
            .map_err(|err| ExtensionError::Transport(err.to_string()))?;
        frame.push('\n');

        let stream = self.reader.get_mut();
        stream.write_all(frame.as_bytes())?;
        stream.flush()?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(ExtensionError::Transport("connection closed by peer".into()));
        }
        serde_json::from_str(reply.trim_end())
            .map_err(|err| ExtensionError::Transport(format!("bad reply frame: {err}")))
    }
}

/// Client for the manager service.
pub struct ManagerClient {
    conn: Connection,
}

impl std::fmt::Debug for ManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerClient").finish_non_exhaustive()
    }
}

impl ManagerClient {
    pub fn connect(addr: &str) -> Result<Self, ExtensionError> {
        Ok(Self {
            conn: Connection::open(addr)?,
        })
    }

    pub fn ping(&mut self) -> Result<ExtensionStatus, ExtensionError> {
        self.conn.request(&ManagerRequest::Ping)
    }

    pub fn register_extension(
        &mut self,
        info: ExtensionInfo,
        registry: Broadcast,
    ) -> Result<ExtensionStatus, ExtensionError> {
        self.conn
            .request(&ManagerRequest::RegisterExtension { info, registry })
    }

    pub fn options(&mut self) -> Result<OptionList, ExtensionError> {
        self.conn.request(&ManagerRequest::Options)
    }

    pub fn extensions(&mut self) -> Result<ExtensionList, ExtensionError> {
        self.conn.request(&ManagerRequest::Extensions)
    }

    pub fn query(&mut self, sql: &str) -> Result<ExtensionResponse, ExtensionError> {
        self.conn.request(&ManagerRequest::Query { sql: sql.into() })
    }

    pub fn get_query_columns(&mut self, sql: &str) -> Result<ExtensionResponse, ExtensionError> {
        self.conn
            .request(&ManagerRequest::GetQueryColumns { sql: sql.into() })
    }

    pub fn call(
        &mut self,
        registry: &str,
        item: &str,
        request: PluginRequest,
    ) -> Result<ExtensionResponse, ExtensionError> {
        self.conn.request(&ManagerRequest::Call {
            registry: registry.into(),
            item: item.into(),
            request,
        })
    }
}

/// Client for a single extension's service.
pub struct ExtensionClient {
    conn: Connection,
}

impl ExtensionClient {
    pub fn connect(addr: &str) -> Result<Self, ExtensionError> {
        Ok(Self {
            conn: Connection::open(addr)?,
        })
    }

    pub fn ping(&mut self) -> Result<ExtensionStatus, ExtensionError> {
        self.conn.request(&ExtensionRequest::Ping)
    }

    pub fn call(
        &mut self,
        registry: &str,
        item: &str,
        request: PluginRequest,
    ) -> Result<ExtensionResponse, ExtensionError> {
        self.conn.request(&ExtensionRequest::Call {
            registry: registry.into(),
            item: item.into(),
            request,
        })
    }

    pub fn shutdown(&mut self) -> Result<ExtensionStatus, ExtensionError> {
        self.conn.request(&ExtensionRequest::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connecting_to_a_dead_endpoint_is_a_transport_error() {
        let err = ManagerClient::connect("/nonexistent/argus.em").unwrap_err();
        assert!(matches!(err, ExtensionError::Transport(_)));
        assert!(err.to_string().starts_with("Extension call failed"));
    }
}
