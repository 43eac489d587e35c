//! Deterministic node keys and enode URLs.
//!
//! A replica's node key is derived from the configured mnemonic along
//! `m/<derivation_index>/<replica>` (both non-hardened), so node identity
//! can be recomputed on every pass without storing private keys.

use bip32::{ChildNumber, XPrv};
use bip39::{Language, Mnemonic};
use k256::ecdsa::SigningKey;

use fullnet_core::{ENODE_PORT, NodeKeyGenerationInfo, ReconcileError, ReconcileResult};

/// A secp256k1 devp2p node key.
#[derive(Clone)]
pub struct NodeKey {
    signing: SigningKey,
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKey")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl NodeKey {
    pub fn from_bytes(bytes: &[u8]) -> ReconcileResult<Self> {
        let signing = SigningKey::from_slice(bytes)
            .map_err(|e| ReconcileError::KeyDerivation(format!("invalid private key: {e}")))?;
        Ok(Self { signing })
    }

    /// Key of replica `index` under the configured mnemonic.
    pub fn derive(info: &NodeKeyGenerationInfo, index: u32) -> ReconcileResult<Self> {
        let parent = derivation_parent(info)?;
        child(&parent, index)
    }

    /// Keys of replicas `[0, replicas)`.
    pub fn derive_all(info: &NodeKeyGenerationInfo, replicas: u32) -> ReconcileResult<Vec<Self>> {
        let parent = derivation_parent(info)?;
        (0..replicas).map(|i| child(&parent, i)).collect()
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Uncompressed public key without the `04` prefix: 128 hex characters.
    pub fn public_key_hex(&self) -> String {
        let point = self.signing.verifying_key().to_encoded_point(false);
        hex::encode(&point.as_bytes()[1..])
    }

    pub fn enode(&self, ip: &str) -> String {
        enode_url(&self.public_key_hex(), ip)
    }
}

/// `enode://<pubkey>@<ip>:30303`
pub fn enode_url(public_key_hex: &str, ip: &str) -> String {
    format!("enode://{public_key_hex}@{ip}:{ENODE_PORT}")
}

fn derivation_parent(info: &NodeKeyGenerationInfo) -> ReconcileResult<XPrv> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, info.mnemonic.trim())
        .map_err(|e| ReconcileError::KeyDerivation(format!("invalid mnemonic: {e}")))?;
    let seed = mnemonic.to_seed_normalized("");
    let master = XPrv::new(seed)
        .map_err(|e| ReconcileError::KeyDerivation(format!("master key: {e}")))?;
    derive_step(&master, info.derivation_index)
}

fn child(parent: &XPrv, index: u32) -> ReconcileResult<NodeKey> {
    let xprv = derive_step(parent, index)?;
    Ok(NodeKey {
        signing: xprv.private_key().clone(),
    })
}

fn derive_step(parent: &XPrv, index: u32) -> ReconcileResult<XPrv> {
    let number = ChildNumber::new(index, false)
        .map_err(|e| ReconcileError::KeyDerivation(format!("child number {index}: {e}")))?;
    parent
        .derive_child(number)
        .map_err(|e| ReconcileError::KeyDerivation(format!("child {index}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn info(derivation_index: u32) -> NodeKeyGenerationInfo {
        NodeKeyGenerationInfo {
            mnemonic: MNEMONIC.to_string(),
            derivation_index,
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = NodeKey::derive(&info(5), 2).unwrap();
        let b = NodeKey::derive(&info(5), 2).unwrap();
        assert_eq!(a.private_key_hex(), b.private_key_hex());
        assert_eq!(a.enode("1.2.3.4"), b.enode("1.2.3.4"));

        let all = NodeKey::derive_all(&info(5), 3).unwrap();
        assert_eq!(all[2].public_key_hex(), a.public_key_hex());
    }

    #[test]
    fn replicas_and_derivation_indices_get_distinct_keys() {
        let keys = NodeKey::derive_all(&info(0), 3).unwrap();
        assert_ne!(keys[0].private_key_hex(), keys[1].private_key_hex());
        assert_ne!(keys[1].private_key_hex(), keys[2].private_key_hex());
        let other = NodeKey::derive(&info(1), 0).unwrap();
        assert_ne!(keys[0].private_key_hex(), other.private_key_hex());
    }

    #[test]
    fn key_encodings_have_expected_shape() {
        let key = NodeKey::derive(&info(0), 0).unwrap();
        assert_eq!(key.private_key_hex().len(), 64);
        let public = key.public_key_hex();
        assert_eq!(public.len(), 128);
        assert!(public.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn public_key_of_one_is_the_generator() {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let key = NodeKey::from_bytes(&bytes).unwrap();
        assert_eq!(
            key.public_key_hex(),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
             483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8"
        );
        assert_eq!(
            key.enode("10.0.0.1"),
            format!("enode://{}@10.0.0.1:30303", key.public_key_hex())
        );
    }

    #[test]
    fn invalid_mnemonic_is_a_key_derivation_error() {
        let bad = NodeKeyGenerationInfo {
            mnemonic: "not a real mnemonic".to_string(),
            derivation_index: 0,
        };
        assert!(matches!(
            NodeKey::derive(&bad, 0),
            Err(ReconcileError::KeyDerivation(_))
        ));
    }
}
