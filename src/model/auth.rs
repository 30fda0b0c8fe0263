use thiserror::Error;

/// Signature lifetime baked into every header the adapter produces.
pub const SIGNATURE_VALIDITY_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthHeaderError {
    #[error("keyId parameter not found in authorization header")]
    MissingKeyId,
    #[error("unterminated quoted value in authorization header")]
    UnterminatedQuote,
    #[error("keyId has incorrect format, expected 3 '|'-separated components, got {0}")]
    KeyIdArity(usize),
    #[error("invalid {field} value: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// Parsed form of the `Signature` auth header.
///
/// Wire format:
/// `Signature keyId="{sub}|{kid}|ed25519",algorithm="ed25519",created="{unix}",expires="{unix}",headers="(created) (expires) digest",signature="{b64}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
    pub subscriber_id: String,
    pub unique_key_id: String,
    pub algorithm: String,
    pub created: i64,
    pub expires: i64,
    pub signature: String,
}

impl AuthHeader {
    /// Serializes the header in the literal Beckn template. The signature is
    /// treated as an opaque string supplied by the Signer; nothing is
    /// URL-encoded.
    pub fn build(
        subscriber_id: &str,
        unique_key_id: &str,
        created: i64,
        expires: i64,
        signature: &str,
    ) -> String {
        format!(
            "Signature keyId=\"{subscriber_id}|{unique_key_id}|ed25519\",algorithm=\"ed25519\",created=\"{created}\",expires=\"{expires}\",headers=\"(created) (expires) digest\",signature=\"{signature}\"",
        )
    }

    /// Challenge value emitted on failed verification.
    pub fn challenge(subscriber_id: &str) -> String {
        format!("Signature realm=\"{subscriber_id}\",headers=\"(created) (expires) digest\"")
    }

    pub fn parse(header: &str) -> Result<Self, AuthHeaderError> {
        let key_id = quoted_param(header, "keyId")?.ok_or(AuthHeaderError::MissingKeyId)?;
        let components: Vec<&str> = key_id.split('|').collect();
        if components.len() != 3 {
            return Err(AuthHeaderError::KeyIdArity(components.len()));
        }

        let created = timestamp_param(header, "created")?;
        let expires = timestamp_param(header, "expires")?;
        let signature = quoted_param(header, "signature")?.unwrap_or_default();

        Ok(Self {
            subscriber_id: components[0].trim().to_string(),
            unique_key_id: components[1].trim().to_string(),
            algorithm: components[2].trim().to_string(),
            created,
            expires,
            signature,
        })
    }
}

/// Locates `name="value"` in the header and returns the trimmed value.
fn quoted_param(header: &str, name: &str) -> Result<Option<String>, AuthHeaderError> {
    let prefix = format!("{name}=\"");
    let Some(start) = header.find(&prefix) else {
        return Ok(None);
    };
    let rest = &header[start + prefix.len()..];
    let Some(end) = rest.find('"') else {
        return Err(AuthHeaderError::UnterminatedQuote);
    };
    Ok(Some(rest[..end].trim().to_string()))
}

fn timestamp_param(header: &str, name: &'static str) -> Result<i64, AuthHeaderError> {
    match quoted_param(header, name)? {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| AuthHeaderError::InvalidTimestamp { field: name, value: raw }),
    }
}
