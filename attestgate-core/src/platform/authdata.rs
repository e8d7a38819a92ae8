//! WebAuthn-style authenticator data as produced by App Attest.
//!
//! Layout: `rpIdHash[32] | flags[1] | signCount[4, BE]`, optionally followed
//! (when the AT flag is set) by `aaguid[16] | credIdLen[2, BE] | credId`.

use crate::error::VerificationFailure;

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

/// Attested credential data present flag.
pub const FLAG_ATTESTED_CREDENTIAL: u8 = 0x40;

/// Parsed authenticator data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub counter: u32,
    pub attested_credential: Option<AttestedCredential>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
}

impl AuthenticatorData {
    pub fn parse(bytes: &[u8]) -> Result<Self, VerificationFailure> {
        if bytes.len() < HEADER_LEN {
            return Err(malformed(format!(
                "authenticator data too short: {} bytes",
                bytes.len()
            )));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
        let flags = bytes[RP_ID_HASH_LEN];
        let counter = u32::from_be_bytes([
            bytes[RP_ID_HASH_LEN + 1],
            bytes[RP_ID_HASH_LEN + 2],
            bytes[RP_ID_HASH_LEN + 3],
            bytes[RP_ID_HASH_LEN + 4],
        ]);

        let attested_credential = if flags & FLAG_ATTESTED_CREDENTIAL != 0 {
            Some(parse_attested_credential(&bytes[HEADER_LEN..])?)
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            counter,
            attested_credential,
        })
    }
}

fn parse_attested_credential(rest: &[u8]) -> Result<AttestedCredential, VerificationFailure> {
    if rest.len() < AAGUID_LEN + 2 {
        return Err(malformed("attested credential data truncated".to_string()));
    }
    let mut aaguid = [0u8; AAGUID_LEN];
    aaguid.copy_from_slice(&rest[..AAGUID_LEN]);

    let id_len = u16::from_be_bytes([rest[AAGUID_LEN], rest[AAGUID_LEN + 1]]) as usize;
    let id_start = AAGUID_LEN + 2;
    let credential_id = rest
        .get(id_start..id_start + id_len)
        .ok_or_else(|| malformed("credential id truncated".to_string()))?
        .to_vec();

    Ok(AttestedCredential {
        aaguid,
        credential_id,
    })
}

fn malformed(reason: String) -> VerificationFailure {
    VerificationFailure::Malformed(reason)
}

/// Build authenticator data bytes (test fixtures).
#[cfg(test)]
pub(crate) fn encode(
    rp_id_hash: &[u8; 32],
    counter: u32,
    credential: Option<(&[u8; 16], &[u8])>,
) -> Vec<u8> {
    let mut out = rp_id_hash.to_vec();
    let flags = if credential.is_some() {
        FLAG_ATTESTED_CREDENTIAL | 0x01
    } else {
        0x01
    };
    out.push(flags);
    out.extend_from_slice(&counter.to_be_bytes());
    if let Some((aaguid, id)) = credential {
        out.extend_from_slice(aaguid);
        out.extend_from_slice(&(id.len() as u16).to_be_bytes());
        out.extend_from_slice(id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assertion_layout() {
        let bytes = encode(&[7u8; 32], 42, None);
        let parsed = AuthenticatorData::parse(&bytes).unwrap();
        assert_eq!(parsed.rp_id_hash, [7u8; 32]);
        assert_eq!(parsed.counter, 42);
        assert!(parsed.attested_credential.is_none());
    }

    #[test]
    fn test_parse_attestation_layout() {
        let bytes = encode(&[1u8; 32], 0, Some((b"appattestdevelop", &[9u8; 32][..])));
        let parsed = AuthenticatorData::parse(&bytes).unwrap();
        let credential = parsed.attested_credential.unwrap();
        assert_eq!(&credential.aaguid, b"appattestdevelop");
        assert_eq!(credential.credential_id, vec![9u8; 32]);
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        assert!(AuthenticatorData::parse(&[0u8; 10]).is_err());

        let mut bytes = encode(&[1u8; 32], 0, Some((b"appattestdevelop", &[9u8; 32][..])));
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            AuthenticatorData::parse(&bytes),
            Err(VerificationFailure::Malformed(_))
        ));
    }
}
