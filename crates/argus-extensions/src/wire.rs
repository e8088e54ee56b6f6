//! Wire protocol between the manager and its extensions.
//!
//! Requests and replies are single newline-delimited JSON frames. Each
//! request carries a `method` tag; the reply is the method's concrete
//! response type, so peers never need a reply envelope.

use argus_core::error::{ExtensionStatus, RouteUuid};
use argus_core::registry::{Broadcast, PluginRequest, PluginResponse, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity an extension presents at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: String,
    pub sdk_version: String,
    pub min_sdk_version: String,
}

impl ExtensionInfo {
    /// Identity of the host itself, reported under the reserved UUID 0.
    pub fn core() -> Self {
        Self {
            name: "core".into(),
            version: argus_core::ARGUS_VERSION.into(),
            sdk_version: argus_core::ARGUS_SDK_VERSION.into(),
            min_sdk_version: argus_core::MIN_SDK_VERSION.into(),
        }
    }
}

/// Live extensions known to a manager.
pub type ExtensionList = BTreeMap<RouteUuid, ExtensionInfo>;

/// One option handed back to a newly registered extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    pub value: String,
    #[serde(default)]
    pub default_value: String,
}

/// Option bundle returned from `options`, used to name the active
/// `config`, `logger`, and `distributed` plugins.
pub type OptionList = BTreeMap<String, OptionValue>;

/// Rows plus status, the shape of every data-bearing reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionResponse {
    pub status: ExtensionStatus,
    pub response: PluginResponse,
}

impl ExtensionResponse {
    pub fn ok(response: PluginResponse) -> Self {
        Self {
            status: ExtensionStatus::success(),
            response,
        }
    }

    pub fn failed(status: ExtensionStatus) -> Self {
        Self {
            status,
            response: PluginResponse::new(),
        }
    }
}

/// Column type names carried over the wire by `get_query_columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Unknown,
    Text,
    Integer,
    Bigint,
    Double,
    Blob,
}

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Bigint => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Blob => "BLOB",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "TEXT" => Self::Text,
            "INTEGER" => Self::Integer,
            "BIGINT" => Self::Bigint,
            "DOUBLE" => Self::Double,
            "BLOB" => Self::Blob,
            _ => Self::Unknown,
        }
    }
}

/// Requests accepted on the manager endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ManagerRequest {
    Ping,
    RegisterExtension {
        info: ExtensionInfo,
        registry: Broadcast,
    },
    Options,
    Extensions,
    Query {
        sql: String,
    },
    GetQueryColumns {
        sql: String,
    },
    Call {
        registry: String,
        item: String,
        request: PluginRequest,
    },
}

/// Requests accepted on an extension endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ExtensionRequest {
    Ping,
    Call {
        registry: String,
        item: String,
        request: PluginRequest,
    },
    Shutdown,
}

/// Build the order-preserving column rows for a `get_query_columns`
/// reply: one single-entry map per column.
pub fn column_rows(columns: &[(String, ColumnType)]) -> PluginResponse {
    columns
        .iter()
        .map(|(name, ty)| {
            let mut row = Row::new();
            row.insert(name.clone(), ty.name().to_string());
            row
        })
        .collect()
}

/// Invert [`column_rows`], tolerating unknown type names.
pub fn columns_from_rows(rows: &PluginResponse) -> Vec<(String, ColumnType)> {
    let mut columns = Vec::new();
    for row in rows {
        for (name, ty) in row {
            columns.push((name.clone(), ColumnType::from_name(ty)));
        }
    }
    columns
}
