//! Broker channel and store key naming.
//!
//! These names are part of the interop surface: every relay instance sharing
//! a broker and store must derive identical names.

/// Request channel: `requests:<sessionId>`.
pub fn request_channel(session_id: &str) -> String {
    format!("requests:{session_id}")
}

/// Response channel: `responses:<sessionId>:<requestId>`.
pub fn response_channel(session_id: &str, request_id: &str) -> String {
    format!("responses:{session_id}:{request_id}")
}

/// Server-initiated events for a session: `events:<sessionId>`.
pub fn event_channel(session_id: &str) -> String {
    format!("events:{session_id}")
}

/// Store key holding the session record: `session:<sessionId>`.
pub fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Store key caching fetched documentation: `docs:<repoId>`.
pub fn docs_key(repo_id: &str) -> String {
    format!("docs:{repo_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        assert_eq!(request_channel("abc"), "requests:abc");
        assert_eq!(response_channel("abc", "r1"), "responses:abc:r1");
        assert_eq!(event_channel("abc"), "events:abc");
        assert_eq!(session_key("abc"), "session:abc");
        assert_eq!(docs_key("owner/repo"), "docs:owner/repo");
    }
}
