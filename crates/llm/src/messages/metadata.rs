//! Provider-opaque metadata that must round-trip unchanged across turns.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Opaque Gemini thought signature.
///
/// Google requires a received thought signature to be passed back exactly as
/// received when sending the conversation history in the next turn. The
/// payload is an uninterpreted byte string: the only permitted operations are
/// store/load (base64 at that boundary) and pass-through to Google. Losing
/// or mutating bytes is a correctness bug.
#[derive(Clone, PartialEq, Eq)]
pub struct ThoughtSignature(Vec<u8>);

impl ThoughtSignature {
    pub fn new(raw: Vec<u8>) -> Self {
        Self(raw)
    }

    /// The signature bytes, exactly as received from Google.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode for JSON storage. The only place encoding happens.
    pub fn to_storage_string(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Decode from JSON storage. The only place decoding happens.
    pub fn from_storage_string(value: &str) -> Result<Self, base64::DecodeError> {
        BASE64.decode(value).map(Self)
    }
}

impl fmt::Debug for ThoughtSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThoughtSignature(length={})", self.0.len())
    }
}

impl Serialize for ThoughtSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_storage_string())
    }
}

impl<'de> Deserialize<'de> for ThoughtSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        ThoughtSignature::from_storage_string(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Provider-specific metadata attached to assistant messages and tool calls.
///
/// Tagged by provider so new variants can be added without touching message
/// handling. Google is the only variant with semantically significant
/// content today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderMetadata {
    /// Gemini metadata preserved across conversation turns.
    Google {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<ThoughtSignature>,
        /// Interaction id for long-running research sessions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interaction_id: Option<String>,
    },
}

impl ProviderMetadata {
    /// Gemini metadata carrying just a thought signature.
    pub fn google_signature(signature: ThoughtSignature) -> Self {
        ProviderMetadata::Google {
            thought_signature: Some(signature),
            interaction_id: None,
        }
    }

    /// The thought signature, when this is Gemini metadata carrying one.
    pub fn thought_signature(&self) -> Option<&ThoughtSignature> {
        match self {
            ProviderMetadata::Google { thought_signature, .. } => thought_signature.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thought_signature_storage_round_trip() {
        // Arbitrary bytes, including invalid UTF-8 and NUL.
        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0u8],
            vec![0xff, 0xfe, 0x00, 0x7f, 0x80],
            (0u8..=255).collect(),
        ];

        for payload in payloads {
            let signature = ThoughtSignature::new(payload.clone());
            let stored = signature.to_storage_string();
            let restored = ThoughtSignature::from_storage_string(&stored).unwrap();
            assert_eq!(restored.as_bytes(), payload.as_slice());
        }
    }

    #[test]
    fn metadata_serializes_with_provider_tag() {
        let metadata = ProviderMetadata::Google {
            thought_signature: Some(ThoughtSignature::new(b"sig".to_vec())),
            interaction_id: Some("interaction-1".to_string()),
        };

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            value,
            json!({
                "provider": "google",
                "thought_signature": "c2ln",
                "interaction_id": "interaction-1",
            })
        );

        let restored: ProviderMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(restored, metadata);
    }

    #[test]
    fn invalid_storage_string_is_rejected() {
        assert!(ThoughtSignature::from_storage_string("not base64 !!").is_err());
    }
}
