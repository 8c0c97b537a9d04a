use crate::secret_string::SecretString;

const AUTH_SCHEME: &str = "APIKey";

/// Constant-time equality between a presented value and a secret.
///
/// The presented value is right-padded with spaces to the secret's length
/// before the byte-for-byte comparison runs, so the comparison never
/// short-circuits on length and never leaks timing information about how
/// many leading bytes matched.
pub fn secure_compare(presented: &str, secret: &str) -> bool {
    let secret_bytes = secret.as_bytes();
    let mut padded = presented.as_bytes().to_vec();
    padded.resize(secret_bytes.len(), b' ');

    let mut diff: u8 = (presented.len() != secret.len()) as u8;
    for (a, b) in padded.iter().zip(secret_bytes.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Extracts the shared secret from an `Authorization: APIKey <secret>` header.
pub fn extract_presented_key(header_value: &str) -> Option<&str> {
    let (scheme, rest) = header_value.split_once(' ')?;
    if scheme != AUTH_SCHEME {
        return None;
    }
    Some(rest)
}

pub fn is_authorized(header_value: Option<&str>, api_key: &SecretString) -> bool {
    match header_value.and_then(extract_presented_key) {
        Some(presented) => secure_compare(presented, api_key.expose_secret()),
        None => false,
    }
}
