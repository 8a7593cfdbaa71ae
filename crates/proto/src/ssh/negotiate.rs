//! Algorithm negotiation (RFC 4253 Section 7.1).
//!
//! For each category the chosen algorithm is the first entry of the client's
//! list that also appears in the server's list.

use conduit_platform::{ConduitError, ConduitResult};

use super::kex::KexInit;

/// Negotiates a single category.
///
/// # Example
///
/// ```rust
/// use conduit_proto::ssh::negotiate::negotiate_algorithm;
///
/// let client = vec!["aes128-ctr".to_string(), "aes256-ctr".to_string()];
/// let server = vec!["aes256-ctr".to_string(), "aes128-ctr".to_string()];
/// assert_eq!(negotiate_algorithm(&client, &server), Some("aes128-ctr".to_string()));
/// ```
pub fn negotiate_algorithm(client_list: &[String], server_list: &[String]) -> Option<String> {
    client_list
        .iter()
        .find(|alg| server_list.contains(alg))
        .cloned()
}

fn negotiate_category(
    category: &str,
    client_list: &[String],
    server_list: &[String],
) -> ConduitResult<String> {
    negotiate_algorithm(client_list, server_list).ok_or_else(|| {
        ConduitError::NegotiationFailed(format!(
            "no common {} algorithm: client={:?}, server={:?}",
            category, client_list, server_list
        ))
    })
}

/// The algorithms chosen for one key exchange epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    /// Key exchange method
    pub kex: String,
    /// Server host key algorithm
    pub host_key: String,
    /// Cipher client to server
    pub cipher_client_to_server: String,
    /// Cipher server to client
    pub cipher_server_to_client: String,
    /// MAC client to server
    pub mac_client_to_server: String,
    /// MAC server to client
    pub mac_server_to_client: String,
    /// Compression client to server
    pub compression_client_to_server: String,
    /// Compression server to client
    pub compression_server_to_client: String,
}

impl NegotiatedAlgorithms {
    /// Runs negotiation over every category of the two KEXINIT messages.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::NegotiationFailed`] naming the first category
    /// without a common algorithm.
    pub fn negotiate(client: &KexInit, server: &KexInit) -> ConduitResult<Self> {
        Ok(Self {
            kex: negotiate_category("kex", client.kex_algorithms(), server.kex_algorithms())?,
            host_key: negotiate_category(
                "host key",
                client.server_host_key_algorithms(),
                server.server_host_key_algorithms(),
            )?,
            cipher_client_to_server: negotiate_category(
                "encryption (client to server)",
                client.encryption_algorithms_client_to_server(),
                server.encryption_algorithms_client_to_server(),
            )?,
            cipher_server_to_client: negotiate_category(
                "encryption (server to client)",
                client.encryption_algorithms_server_to_client(),
                server.encryption_algorithms_server_to_client(),
            )?,
            mac_client_to_server: negotiate_category(
                "mac (client to server)",
                client.mac_algorithms_client_to_server(),
                server.mac_algorithms_client_to_server(),
            )?,
            mac_server_to_client: negotiate_category(
                "mac (server to client)",
                client.mac_algorithms_server_to_client(),
                server.mac_algorithms_server_to_client(),
            )?,
            compression_client_to_server: negotiate_category(
                "compression (client to server)",
                client.compression_algorithms_client_to_server(),
                server.compression_algorithms_client_to_server(),
            )?,
            compression_server_to_client: negotiate_category(
                "compression (server to client)",
                client.compression_algorithms_server_to_client(),
                server.compression_algorithms_server_to_client(),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::crypto::Algorithms;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_client_preference_wins() {
        let client = names(&["aes128-ctr", "aes256-ctr"]);
        let server = names(&["aes256-ctr", "aes128-ctr"]);
        assert_eq!(
            negotiate_algorithm(&client, &server).as_deref(),
            Some("aes128-ctr")
        );
    }

    #[test]
    fn test_no_common_algorithm() {
        assert_eq!(negotiate_algorithm(&names(&["kex-a"]), &names(&["kex-b"])), None);
        assert!(matches!(
            negotiate_category("kex", &names(&["kex-a"]), &names(&["kex-b"])),
            Err(ConduitError::NegotiationFailed(msg)) if msg.contains("kex")
        ));
    }

    #[test]
    fn test_negotiate_full_kexinit() {
        let client = KexInit::from_algorithms(&Algorithms::default());
        let server = KexInit::from_algorithms(
            &Algorithms::default()
                .with_ciphers(&["aes128-ctr"])
                .with_macs(&["hmac-sha1"]),
        );

        let negotiated = NegotiatedAlgorithms::negotiate(&client, &server).unwrap();
        assert_eq!(negotiated.kex, "curve25519-sha256");
        assert_eq!(negotiated.host_key, "ssh-ed25519");
        assert_eq!(negotiated.cipher_client_to_server, "aes128-ctr");
        assert_eq!(negotiated.cipher_server_to_client, "aes128-ctr");
        assert_eq!(negotiated.mac_client_to_server, "hmac-sha1");
        assert_eq!(negotiated.compression_client_to_server, "none");
    }

    #[test]
    fn test_negotiate_names_failing_category() {
        let client = KexInit::from_algorithms(&Algorithms::default().with_macs(&["hmac-sha1"]));
        let server = KexInit::from_algorithms(
            &Algorithms::default().with_macs(&["hmac-sha2-512"]),
        );
        match NegotiatedAlgorithms::negotiate(&client, &server) {
            Err(ConduitError::NegotiationFailed(msg)) => assert!(msg.contains("mac")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
