//! Section table records.
//!
//! The section table starts immediately after the optional header and holds
//! `FileHeader::section_count` fixed 40-byte records in on-disk order. Enumeration
//! (driven from [`crate::Image::sections`]) is best-effort: a record whose bytes fall
//! outside the image is skipped with a diagnostic rather than aborting the walk, so
//! partial results from a damaged image remain usable.

use bitflags::bitflags;

use crate::{image::parser::Parser, Result};

/// Size of one section header record in bytes.
pub(crate) const SECTION_HEADER_SIZE: usize = 40;

bitflags! {
    /// Characteristic flags of a section.
    ///
    /// Only the flags this crate's callers commonly dispatch on are named; the
    /// remaining bits are retained and round-trip unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionCharacteristics: u32 {
        /// Section contains executable code.
        const CODE = 0x0000_0020;
        /// Section contains initialized data.
        const INITIALIZED_DATA = 0x0000_0040;
        /// Section contains uninitialized data.
        const UNINITIALIZED_DATA = 0x0000_0080;
        /// Section can be discarded after load.
        const MEM_DISCARDABLE = 0x0200_0000;
        /// Section is shared between processes.
        const MEM_SHARED = 0x1000_0000;
        /// Section is executable.
        const MEM_EXECUTE = 0x2000_0000;
        /// Section is readable.
        const MEM_READ = 0x4000_0000;
        /// Section is writable.
        const MEM_WRITE = 0x8000_0000;
    }
}

/// One record of the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Raw section name, NUL-padded to eight bytes.
    pub name: [u8; 8],
    /// Size of the section once mapped.
    pub virtual_size: u32,
    /// RVA the section is mapped at.
    pub virtual_address: u32,
    /// Size of the section's initialized data on disk.
    pub size_of_raw_data: u32,
    /// File offset of the section's data.
    pub pointer_to_raw_data: u32,
    /// File offset of relocations (object files only).
    pub pointer_to_relocations: u32,
    /// File offset of COFF line numbers (deprecated).
    pub pointer_to_linenumbers: u32,
    /// Number of relocation entries.
    pub number_of_relocations: u16,
    /// Number of line-number entries.
    pub number_of_linenumbers: u16,
    /// Characteristic flags.
    pub characteristics: SectionCharacteristics,
}

impl SectionHeader {
    /// Read a section header at the parser's current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on a truncated record.
    pub fn read(parser: &mut Parser<'_>) -> Result<SectionHeader> {
        let mut name = [0u8; 8];
        for byte in &mut name {
            *byte = parser.read_le::<u8>()?;
        }

        Ok(SectionHeader {
            name,
            virtual_size: parser.read_le::<u32>()?,
            virtual_address: parser.read_le::<u32>()?,
            size_of_raw_data: parser.read_le::<u32>()?,
            pointer_to_raw_data: parser.read_le::<u32>()?,
            pointer_to_relocations: parser.read_le::<u32>()?,
            pointer_to_linenumbers: parser.read_le::<u32>()?,
            number_of_relocations: parser.read_le::<u16>()?,
            number_of_linenumbers: parser.read_le::<u16>()?,
            characteristics: SectionCharacteristics::from_bits_retain(
                parser.read_le::<u32>()?,
            ),
        })
    }

    /// The section name with trailing NUL padding stripped, lossily decoded.
    #[must_use]
    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self
            .name
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end])
    }

    /// `true` if the given RVA falls inside this section's mapped range.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && u64::from(rva) < u64::from(self.virtual_address) + u64::from(self.virtual_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::io::write_le_at;

    fn raw_section(name: &[u8], virtual_address: u32, virtual_size: u32) -> Vec<u8> {
        let mut data = vec![0u8; SECTION_HEADER_SIZE];
        data[..name.len()].copy_from_slice(name);

        let mut offset = 8;
        write_le_at(&mut data, &mut offset, virtual_size).unwrap();
        write_le_at(&mut data, &mut offset, virtual_address).unwrap();

        offset = 36;
        write_le_at(
            &mut data,
            &mut offset,
            (SectionCharacteristics::CODE | SectionCharacteristics::MEM_EXECUTE).bits(),
        )
        .unwrap();
        data
    }

    #[test]
    fn read_record() {
        let data = raw_section(b".text", 0x1000, 0x400);
        let mut parser = Parser::new(&data);

        let section = SectionHeader::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), SECTION_HEADER_SIZE);
        assert_eq!(section.name_str(), ".text");
        assert_eq!(section.virtual_address, 0x1000);
        assert_eq!(section.virtual_size, 0x400);
        assert!(section.characteristics.contains(SectionCharacteristics::CODE));
        assert!(section
            .characteristics
            .contains(SectionCharacteristics::MEM_EXECUTE));
        assert!(!section
            .characteristics
            .contains(SectionCharacteristics::MEM_WRITE));
    }

    #[test]
    fn read_truncated_record() {
        let data = [0u8; SECTION_HEADER_SIZE - 1];
        let mut parser = Parser::new(&data);
        assert!(SectionHeader::read(&mut parser).is_err());
    }

    #[test]
    fn rva_containment() {
        let data = raw_section(b".data", 0x2000, 0x100);
        let section = SectionHeader::read(&mut Parser::new(&data)).unwrap();

        assert!(section.contains_rva(0x2000));
        assert!(section.contains_rva(0x20FF));
        assert!(!section.contains_rva(0x2100));
        assert!(!section.contains_rva(0x1FFF));
    }

    #[test]
    fn full_name_without_terminator() {
        let data = raw_section(b"LONGNAME", 0, 0);
        let section = SectionHeader::read(&mut Parser::new(&data)).unwrap();
        assert_eq!(section.name_str(), "LONGNAME");
    }
}
