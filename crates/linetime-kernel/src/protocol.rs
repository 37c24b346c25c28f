//! Request and response types for the session boundary.
//!
//! One JSON object per request. The operation is flattened into the
//! envelope under an `op` tag:
//!
//! ```json
//! {"session_id": "...", "request_id": 7, "op": "line_change",
//!  "block": "...", "line": 3, "text": "fn main() {"}
//! ```

use std::path::PathBuf;

use linetime_types::{BlockId, BlockInfo, Eol, LineRange, RequestId, SessionId, TagId, TagInfo, TextRange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Absent only for `create_session`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub request_id: RequestId,
    /// Run only after this request has completed in the same session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_request_id: Option<RequestId>,
    #[serde(flatten)]
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "op", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    // Session lifecycle
    CreateSession,
    CloseSession,
    WaitForQuiescence,

    // Document lifecycle
    LoadFile {
        path: PathBuf,
    },
    LoadContent {
        content: String,
        #[serde(default)]
        eol: Option<Eol>,
    },
    UpdatePath {
        block: BlockId,
        path: PathBuf,
    },
    UnloadFile {
        block: BlockId,
    },

    // Reads
    GetText {
        block: BlockId,
    },
    GetRootText {
        block: BlockId,
    },
    GetBlockInfo {
        block: BlockId,
    },
    GetChildrenInfo {
        block: BlockId,
    },
    ListTags {
        block: BlockId,
    },

    // Edits
    LineChange {
        block: BlockId,
        line: usize,
        text: String,
    },
    MultiLineChange {
        block: BlockId,
        range: TextRange,
        text: String,
        /// Character length of the replaced range, as computed by the editor.
        #[serde(default)]
        range_length: Option<usize>,
        /// Character offset of the range start within the block.
        #[serde(default)]
        range_offset: Option<usize>,
    },

    // Snapshots
    CreateChild {
        block: BlockId,
        range: LineRange,
    },
    DeleteBlock {
        block: BlockId,
    },
    CopyBlock {
        block: BlockId,
    },

    // Version navigation
    SetVersionIndex {
        block: BlockId,
        index: usize,
    },
    ApplyTag {
        block: BlockId,
        tag: TagId,
    },
    SaveTag {
        block: BlockId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl Operation {
    /// Wire name, for logs.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Whether this operation needs exclusive access to the session's
    /// documents. Reads run concurrently with each other.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Operation::GetText { .. }
                | Operation::GetRootText { .. }
                | Operation::GetBlockInfo { .. }
                | Operation::GetChildrenInfo { .. }
                | Operation::ListTags { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Session { session_id: SessionId },
    Done,
    Text { text: String },
    /// Blocks whose visible content changed.
    Affected { blocks: Vec<BlockId> },
    /// `None` when the requested child overlaps an existing one.
    Child { block: Option<BlockInfo> },
    Block { info: BlockInfo },
    Blocks { blocks: Vec<BlockInfo> },
    Tag { tag: TagInfo },
    Tags { tags: Vec<TagInfo> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Reply),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    pub outcome: Outcome,
}

impl Response {
    pub fn ok(request_id: RequestId, reply: Reply) -> Self {
        Self {
            request_id,
            outcome: Outcome::Ok(reply),
        }
    }

    pub fn error(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            outcome: Outcome::Error(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok(_))
    }
}
