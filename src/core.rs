use std::fmt;

use serde::Serialize;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// The image cache keys every entry by two of these: one over the raw source
/// bytes and one over the CBOR encoding of the options that produced it. The
/// same options always encode to the same bytes, so two runs with unchanged
/// configuration land on the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// Hash the CBOR encoding of a serializable value.
    pub fn hash_cbor<T: Serialize>(value: &T) -> std::io::Result<Self> {
        let mut buffer = Vec::new();
        ciborium::into_writer(value, &mut buffer).map_err(std::io::Error::other)?;
        Ok(Self::hash(buffer))
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The named processing tasks.
///
/// `dev` and `default` are not tasks in this sense; they are entry points
/// composed out of these by the [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskName {
    Html,
    Style,
    CleanStyle,
    Script,
    Image,
    ImageWebp,
    ImageAvif,
}

impl TaskName {
    pub const ALL: [TaskName; 7] = [
        TaskName::Html,
        TaskName::Style,
        TaskName::CleanStyle,
        TaskName::Script,
        TaskName::Image,
        TaskName::ImageWebp,
        TaskName::ImageAvif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::Html => "html",
            TaskName::Style => "style",
            TaskName::CleanStyle => "clean-style",
            TaskName::Script => "script",
            TaskName::Image => "image",
            TaskName::ImageWebp => "image-webp",
            TaskName::ImageAvif => "image-avif",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
