//! Checksum parsing and verification (§4.7). Grounded on `sps2`'s
//! `download::resume::get_resume_offset`, which hashes a partial file with
//! blake3 before trusting it; generalized here to the full algorithm set
//! and the coreutils sidecar format.

use crate::error::DownloadError;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;
use tokio::io::AsyncWrite;

/// Supported digest algorithms (§3 `Checksum`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl Algorithm {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }

    /// Auto-detects an algorithm from bare hex length (§3): 32→md5, 40→sha1,
    /// 64→sha256, 128→sha512. Blake3 (also 64 hex chars) cannot be
    /// disambiguated from sha256 by length alone and is never auto-detected.
    #[must_use]
    pub fn from_hex_length(hex_len: usize) -> Option<Self> {
        match hex_len {
            32 => Some(Self::Md5),
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            128 => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// A parsed `(algorithm, hex_value)` pair.
#[derive(Debug, Clone)]
pub struct Checksum {
    pub algorithm: Algorithm,
    pub hex: String,
}

impl Checksum {
    /// Parses `algo:hex` or a bare auto-detected hex string.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some((algo, hex)) = input.split_once(':') {
            let algorithm = Algorithm::from_name(algo)?;
            if !is_hex(hex) {
                return None;
            }
            return Some(Self {
                algorithm,
                hex: hex.to_ascii_lowercase(),
            });
        }
        if is_hex(input) {
            let algorithm = Algorithm::from_hex_length(input.len())?;
            return Some(Self {
                algorithm,
                hex: input.to_ascii_lowercase(),
            });
        }
        None
    }

    /// Parses a GNU-coreutils-style sidecar (`HEX  filename` or
    /// `HEX *filename`), skipping `#` comment lines. Looks up by
    /// `target_filename`, falling back to the sole entry when there is
    /// exactly one.
    #[must_use]
    pub fn parse_coreutils_file(contents: &str, target_filename: &str) -> Option<Self> {
        let entries: Vec<(String, String)> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.splitn(2, char::is_whitespace);
                let hex = parts.next()?.to_string();
                let name = parts.next()?.trim_start_matches('*').trim().to_string();
                Some((hex, name))
            })
            .collect();

        let hex = if entries.len() == 1 {
            entries[0].0.clone()
        } else {
            entries
                .iter()
                .find(|(_, name)| name == target_filename)
                .map(|(hex, _)| hex.clone())?
        };

        if !is_hex(&hex) {
            return None;
        }
        let algorithm = Algorithm::from_hex_length(hex.len())?;
        Some(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(blake3::Hasher),
}

impl Hasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Md5 => Self::Md5(Md5::new()),
            Algorithm::Sha1 => Self::Sha1(Sha1::new()),
            Algorithm::Sha256 => Self::Sha256(Sha256::new()),
            Algorithm::Sha512 => Self::Sha512(Sha512::new()),
            Algorithm::Blake3 => Self::Blake3(blake3::Hasher::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(h) => h.update(bytes),
            Self::Sha1(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
            Self::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

const BUFFER_SIZE: usize = 32 * 1024;

/// Streams `path` through the selected hasher and compares hex-encoded,
/// lowercased digests.
pub async fn verify(path: &Path, checksum: &Checksum) -> Result<bool, DownloadError> {
    let path = path.to_path_buf();
    let algorithm = checksum.algorithm;
    let actual = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Hasher::new(algorithm);
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize_hex())
    })
    .await
    .map_err(|e| DownloadError::Io(std::io::Error::other(e.to_string())))??;

    Ok(actual.eq_ignore_ascii_case(&checksum.hex))
}

/// Hashes bytes as they are written during download, so a checksum known in
/// advance can be verified in one pass without re-reading the file.
pub struct ChecksumWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W> ChecksumWriter<W> {
    pub fn new(inner: W, algorithm: Algorithm) -> Self {
        Self {
            inner,
            hasher: Hasher::new(algorithm),
        }
    }

    /// Consumes the writer, returning the final hex digest. Call only after
    /// all bytes have been written through it.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        self.hasher.finalize_hex()
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ChecksumWriter<W> {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        let poll = std::pin::Pin::new(&mut self.inner).poll_write(cx, buf);
        if let std::task::Poll::Ready(Ok(n)) = &poll {
            self.hasher.update(&buf[..*n]);
        }
        poll
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
