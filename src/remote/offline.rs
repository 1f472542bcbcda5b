//! Heuristic recognition of "the relay is unreachable" failures.
//!
//! The transport does not distinguish connectivity failures structurally,
//! so this inspects the rendered error chain for known signatures. It is a
//! heuristic: an unrecognised connectivity failure is treated as fatal, and
//! a protocol error that happens to contain a signature would be treated as
//! offline.

/// Lower-case substrings that mark a connectivity failure.
const OFFLINE_SIGNATURES: &[&str] = &[
    "simulated network error",
    // DNS
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname provided",
    "no such host",
    // routing / sockets
    "network is unreachable",
    "connection reset",
    "connection refused",
    "unexpected eof",
    // gateways
    "status_code=502",
    "status_code=503",
    // timeouts
    "i/o timeout",
    "timed out",
    "tls handshake timeout",
];

/// Whether a rendered error message looks like a connectivity failure.
pub fn is_offline_message(message: &str) -> bool {
    let normalized = message.to_lowercase();
    OFFLINE_SIGNATURES.iter().any(|sig| normalized.contains(sig))
}

/// Whether `err` (including its whole cause chain) looks like a
/// connectivity failure.
pub fn is_offline_error(err: &anyhow::Error) -> bool {
    is_offline_message(&format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_refused_is_offline() {
        let err = anyhow::anyhow!("tcp connect error: Connection refused (os error 111)")
            .context("failed to GET https://api.histsync.dev/api/v1/query");
        assert!(is_offline_error(&err));
    }

    #[test]
    fn invalid_json_is_not_offline() {
        let err = anyhow::anyhow!("invalid JSON at line 1 column 2")
            .context("failed to load JSON response from query");
        assert!(!is_offline_error(&err));
    }

    #[test]
    fn gateway_statuses_are_offline_but_other_statuses_are_not() {
        assert!(is_offline_message("failed to GET x: status_code=502"));
        assert!(is_offline_message("failed to POST x: status_code=503"));
        assert!(!is_offline_message("failed to GET x: status_code=500"));
        assert!(!is_offline_message("failed to GET x: status_code=404"));
    }

    #[test]
    fn recognises_dns_reset_eof_and_timeouts() {
        for msg in [
            "dns error: failed to lookup address information: Name or service not known",
            "Connection reset by peer (os error 104)",
            "connection closed: unexpected EOF",
            "operation timed out",
            "TLS handshake timeout",
            "connect: network is unreachable",
            "simulated network error: dns error",
        ] {
            assert!(is_offline_message(msg), "{msg}");
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_offline_message("CONNECTION REFUSED"));
    }

    #[test]
    fn decryption_failure_is_not_offline() {
        assert!(!is_offline_message(
            "failed to decrypt history entry abc (wrong secret or corrupted data)"
        ));
    }
}
