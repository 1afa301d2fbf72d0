use serde::{Deserialize, Serialize};

/// A call room started from a conversation. The token is what clients use to
/// join the media session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRoom {
    pub id: i64,
    pub conversation_id: i64,
    pub token: String,
    pub created_by: i64,
    pub created_at: String,
}
