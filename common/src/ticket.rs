//! Ticket lists: parsing, serialization and encrypted transport.
//!
//! Wire form is `cred:path[;cred:path...]`. A credential is printable ASCII without `:` or `;`, the path is
//! absolute and lies inside the zone. Parsing is all-or-nothing: the first bad entry fails the whole list.

use anyhow::{Context, Result};
use base64::Engine;

use crate::config::ZONE_ROOT;
use crate::crypto;
use crate::error::Error;

const ENTRY_SEPARATOR: char = ';';
const FIELD_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub credential: String,
    pub path: String,
}

impl Ticket {
    /// Parses a single `cred:path` entry.
    pub fn parse(entry: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidTicket(entry.to_string());
        let (credential, path) = entry.trim().split_once(FIELD_SEPARATOR).ok_or_else(invalid)?;
        if credential.is_empty()
            || !credential
                .chars()
                .all(|c| c.is_ascii_graphic() && c != FIELD_SEPARATOR && c != ENTRY_SEPARATOR)
        {
            return Err(invalid());
        }
        if !path.starts_with(ZONE_ROOT) || path.contains(ENTRY_SEPARATOR) {
            return Err(invalid());
        }
        Ok(Self {
            credential: credential.to_string(),
            path: path.to_string(),
        })
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.credential, FIELD_SEPARATOR, self.path)
    }
}

/// Parses a ticket list; empty entries (e.g. a trailing `;`) are ignored.
pub fn parse_ticket_list(text: &str) -> Result<Vec<Ticket>, Error> {
    let tickets = text
        .split(ENTRY_SEPARATOR)
        .filter(|entry| !entry.trim().is_empty())
        .map(Ticket::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if tickets.is_empty() {
        return Err(Error::InvalidTicket(text.to_string()));
    }
    Ok(tickets)
}

pub fn serialize_ticket_list(tickets: &[Ticket]) -> String {
    tickets
        .iter()
        .map(Ticket::to_string)
        .collect::<Vec<_>>()
        .join(&ENTRY_SEPARATOR.to_string())
}

pub fn encrypt_payload(secret: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    crypto::aes_encrypt(secret, plaintext)
}

pub fn decrypt_payload(secret: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
    crypto::aes_decrypt(secret, ciphertext)
}

/// Keyed transform of a bearer token, salted with the submitter's identity (ORC-ID).
pub fn derive_secret(raw_secret: &[u8], context: &str) -> Result<String> {
    crypto::hmac_sha3_224(raw_secret, context)
}

/// Token as sent to the ticket service for submissions.
pub fn derive_submit_token(token: &str, orcid: &str) -> Result<String> {
    let raw = crypto::base64_url_decode(token).context("failed to decode token")?;
    derive_secret(&raw, orcid).context("failed to derive submission token")
}

/// Encrypted transport form: base64(AES(serialize(tickets))) keyed by the MD5 of a password.
pub fn encode_ticket_list(tickets: &[Ticket], password: &str) -> Result<String> {
    let key = crypto::md5_hex(password);
    let encrypted = encrypt_payload(&key, serialize_ticket_list(tickets).as_bytes())
        .context("failed to encrypt ticket list")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(encrypted))
}

pub fn decode_ticket_list(encoded: &str, password: &str) -> Result<Vec<Ticket>> {
    let key = crypto::md5_hex(password);
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| Error::InvalidTicket(encoded.to_string()))?;
    let plain = decrypt_payload(&key, &raw).context("failed to decrypt ticket list")?;
    let text = String::from_utf8(plain).map_err(|_| Error::InvalidTicket(encoded.to_string()))?;
    Ok(parse_ticket_list(&text)?)
}

/// Two-column table of credentials and paths, one ticket per line.
pub fn describe_ticket_list(tickets: &[Ticket]) -> String {
    let mut out = format!("{:<50}\t{}\n", "TICKET", "PATH");
    for ticket in tickets {
        out.push_str(&format!("{:<50}\t{}\n", ticket.credential, ticket.path));
    }
    out
}

/// Accepts either a plain ticket list or, with a password, its encrypted form.
pub fn read_ticket_string(text: &str, password: Option<&str>) -> Result<Vec<Ticket>> {
    match password {
        Some(password) if !text.contains(FIELD_SEPARATOR) => decode_ticket_list(text, password),
        _ => Ok(parse_ticket_list(text)?),
    }
}
