use std::fmt::{Debug, Formatter};

use rspirv::dr;

use crate::error::{post_error, Error};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A binary SPIR-V module. The content is opaque apart from the header until it is parsed.
#[derive(Clone, PartialEq, Eq)]
pub struct SpirvModule {
    words: Vec<u32>,
}

impl SpirvModule {
    /// Header words: magic, version, generator, bound, schema.
    const HEADER_LEN: usize = 5;

    pub fn from_words(words: Vec<u32>) -> Result<Self, Error> {
        if words.len() < Self::HEADER_LEN {
            return post_error(Error::SpirvParse(format!("module has {} words, the header alone needs {}", words.len(), Self::HEADER_LEN)));
        }
        if words[0] != SPIRV_MAGIC {
            return post_error(Error::SpirvParse(format!("bad magic number {:#010x}", words[0])));
        }
        Ok(Self { words })
    }

    /// Reads a module from little endian bytes. The length must be a multiple of 4.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() % 4 != 0 {
            return post_error(Error::SpirvParse(format!("module size {} is not a multiple of 4", bytes.len())));
        }
        let words = bytes.chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::from_words(words)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// The (major, minor) version of the module header.
    pub fn version(&self) -> (u8, u8) {
        let version = self.words[1];
        (((version >> 16) & 0xFF) as u8, ((version >> 8) & 0xFF) as u8)
    }

    /// Upper bound of the result ids used in the module.
    pub fn bound(&self) -> u32 {
        self.words[3]
    }

    pub fn parse(&self) -> Result<dr::Module, Error> {
        match dr::load_words(&self.words) {
            Ok(module) => Ok(module),
            Err(err) => post_error(Error::SpirvParse(format!("{:?}", err))),
        }
    }

    pub(crate) fn from_dr(module: &dr::Module) -> Result<Self, Error> {
        use rspirv::binary::Assemble;
        Self::from_words(module.assemble())
    }
}

impl Debug for SpirvModule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpirvModule")
            .field("version", &self.version())
            .field("bound", &self.bound())
            .field("words", &self.words.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(SpirvModule::from_bytes(&[0, 1, 2]), Err(Error::SpirvParse(_))));
        assert!(matches!(SpirvModule::from_words(vec![SPIRV_MAGIC, 0x0001_0000]), Err(Error::SpirvParse(_))));
        assert!(matches!(SpirvModule::from_words(vec![0xDEAD_BEEF, 0x0001_0000, 0, 1, 0]), Err(Error::SpirvParse(_))));
    }

    #[test]
    fn bytes_are_little_endian() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0300, 0, 12, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let module = SpirvModule::from_bytes(&bytes).unwrap();
        assert_eq!(module.words()[0], SPIRV_MAGIC);
        assert_eq!(module.version(), (1, 3));
        assert_eq!(module.bound(), 12);
    }
}
