// src/hash.rs

//! Image and tree checksums
//!
//! Files are streamed once and fed to every requested algorithm, so an ISO
//! is read a single time no matter how many checksums are configured.

use crate::config::ChecksumType;
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

enum HasherState {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Incremental hasher for one algorithm
pub struct Hasher {
    algorithm: ChecksumType,
    state: HasherState,
}

impl Hasher {
    pub fn new(algorithm: ChecksumType) -> Self {
        let state = match algorithm {
            ChecksumType::Md5 => HasherState::Md5(Md5::new()),
            ChecksumType::Sha256 => HasherState::Sha256(Sha256::new()),
            ChecksumType::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Sha512(h) => hex::encode(h.finalize()),
        }
    }

    #[inline]
    pub fn algorithm(&self) -> ChecksumType {
        self.algorithm
    }
}

/// Hash a reader with several algorithms at once
pub fn hash_reader<R: Read>(algorithms: &[ChecksumType], reader: &mut R) -> io::Result<BTreeMap<String, String>> {
    let mut hashers: Vec<Hasher> = algorithms.iter().map(|a| Hasher::new(*a)).collect();
    let mut buffer = vec![0u8; 1 << 16];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        for hasher in &mut hashers {
            hasher.update(&buffer[..n]);
        }
    }
    Ok(hashers
        .into_iter()
        .map(|h| (h.algorithm().to_string(), h.finalize()))
        .collect())
}

/// Checksums of a file keyed by algorithm name
pub fn hash_file(path: &Path, algorithms: &[ChecksumType]) -> io::Result<BTreeMap<String, String>> {
    let mut file = File::open(path)?;
    hash_reader(algorithms, &mut file)
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut sums = hash_file(path, &[ChecksumType::Sha256])?;
    Ok(sums.remove("sha256").unwrap_or_default())
}

/// One line of a `CHECKSUM` file in the BSD tag format
pub fn checksum_line(algorithm: &str, file_name: &str, digest: &str) -> String {
    format!("{} ({}) = {}\n", algorithm.to_uppercase(), file_name, digest)
}
