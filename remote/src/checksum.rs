//! Checksums as advertised by the store and as computed locally.
//!
//! The store reports checksums as `<algorithm>:<value>` strings (`sha2:` meaning SHA-256, value base64 encoded)
//! except MD5, which is a bare hex string. Locally we keep the raw digest bytes and the algorithm.

use base64::Engine;
use sha2::Digest;
use tokio::io::AsyncReadExt;

use crate::Error;

const HASH_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Adler32,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
            ChecksumAlgorithm::Adler32 => "adler32",
        }
    }

    /// Text form of a digest: hex for md5/adler32, standard base64 for the SHA family.
    pub fn encode(&self, digest: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Md5 | ChecksumAlgorithm::Adler32 => hex::encode(digest),
            _ => base64::engine::general_purpose::STANDARD.encode(digest),
        }
    }

    pub fn decode(&self, text: &str) -> Result<Vec<u8>, Error> {
        let decoded = match self {
            ChecksumAlgorithm::Md5 | ChecksumAlgorithm::Adler32 => hex::decode(text).ok(),
            _ => base64::engine::general_purpose::STANDARD.decode(text).ok(),
        };
        decoded.ok_or_else(|| Error::MalformedChecksum(text.to_string()))
    }

    fn wire_prefix(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha2",
            other => other.name(),
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" | "sha-1" => Ok(ChecksumAlgorithm::Sha1),
            "sha2" | "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(ChecksumAlgorithm::Sha512),
            "adler32" | "adler-32" => Ok(ChecksumAlgorithm::Adler32),
            _ => Err(Error::UnknownChecksumAlgorithm(s.to_string())),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub value: Vec<u8>,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, value: Vec<u8>) -> Self {
        Self { algorithm, value }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Digest in its algorithm's text encoding, without the algorithm prefix.
    pub fn encoded(&self) -> String {
        self.algorithm.encode(&self.value)
    }

    /// Parses the store's checksum string.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let text = text.trim();
        match text.split_once(':') {
            Some((prefix, value)) => {
                let algorithm: ChecksumAlgorithm = prefix.parse()?;
                Ok(Self::new(algorithm, algorithm.decode(value)?))
            }
            None => Ok(Self::new(
                ChecksumAlgorithm::Md5,
                ChecksumAlgorithm::Md5.decode(text)?,
            )),
        }
    }

    /// Inverse of [`Checksum::parse`].
    pub fn to_wire(&self) -> String {
        match self.algorithm {
            ChecksumAlgorithm::Md5 => self.encoded(),
            other => format!("{}:{}", other.wire_prefix(), self.encoded()),
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

/// Incremental digest over any supported algorithm.
pub enum Hasher {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Adler32(adler2::Adler32),
}

impl Hasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
            ChecksumAlgorithm::Adler32 => Hasher::Adler32(adler2::Adler32::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Adler32(h) => h.write_slice(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            Hasher::Md5(ctx) => Checksum::new(ChecksumAlgorithm::Md5, ctx.compute().0.to_vec()),
            Hasher::Sha1(h) => Checksum::new(ChecksumAlgorithm::Sha1, h.finalize().to_vec()),
            Hasher::Sha256(h) => Checksum::new(ChecksumAlgorithm::Sha256, h.finalize().to_vec()),
            Hasher::Sha512(h) => Checksum::new(ChecksumAlgorithm::Sha512, h.finalize().to_vec()),
            Hasher::Adler32(h) => Checksum::new(
                ChecksumAlgorithm::Adler32,
                h.checksum().to_be_bytes().to_vec(),
            ),
        }
    }
}

pub fn hash_bytes(data: &[u8], algorithm: ChecksumAlgorithm) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Streams a local file through the hasher.
pub async fn hash_file(
    path: &std::path::Path,
    algorithm: ChecksumAlgorithm,
) -> std::io::Result<Checksum> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}
