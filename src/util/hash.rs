//! Hashing utilities for content checksums and fingerprints.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA256 hash of a file, streaming its content.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut builder = DigestBuilder::new();
    builder.update_file(path)?;
    Ok(builder.finish())
}

/// Incremental SHA256 over a sequence of framed components.
///
/// Every component is length-prefixed so that `["ab", "c"]` and
/// `["a", "bc"]` never collide.
#[derive(Default)]
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    pub fn new() -> Self {
        DigestBuilder {
            hasher: Sha256::new(),
        }
    }

    /// Add a tagged section marker.
    pub fn section(&mut self, tag: &str) -> &mut Self {
        self.hasher.update(b"\x02");
        self.update_str(tag)
    }

    /// Add a string component.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.update_bytes(s.as_bytes())
    }

    /// Add a raw byte component.
    pub fn update_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Add multiple strings, plus their count.
    pub fn update_strs<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> &mut Self {
        let mut count = 0u64;
        for s in items {
            self.update_str(s);
            count += 1;
        }
        self.hasher.update(count.to_le_bytes());
        self
    }

    /// Add a file's full content as one component.
    pub fn update_file(&mut self, path: &Path) -> io::Result<&mut Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        self.hasher.update(len.to_le_bytes());

        let mut reader = BufReader::new(file);
        let mut buffer = [0u8; 8192];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            self.hasher.update(&buffer[..n]);
        }
        Ok(self)
    }

    /// Finalize and return the digest as a hex string.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}
