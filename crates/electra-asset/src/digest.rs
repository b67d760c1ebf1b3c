use sha1::{Digest, Sha1};

/// Hex-encoded sha1 of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
  hex::encode(Sha1::digest(data))
}

/// Incremental sha1 over a stream of chunks, tracking the byte count.
#[derive(Default)]
pub struct Digester {
  hasher: Sha1,
  size: u64,
}

impl Digester {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&mut self, chunk: &[u8]) {
    self.hasher.update(chunk);
    self.size += chunk.len() as u64;
  }

  pub fn size(&self) -> u64 {
    self.size
  }

  /// Consume the digester, returning `(hex digest, size)`.
  pub fn finish(self) -> (String, u64) {
    (hex::encode(self.hasher.finalize()), self.size)
  }
}
