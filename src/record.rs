// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};

use crate::attribute::{
    Attribute, AttributeType, AttributeValue, DataStream, FileName, NameNamespace,
    StandardInformation,
};
use crate::error::{Diagnostics, MftError};

/// Every MFT slot handled by this crate is 1 KiB.
pub const RECORD_SIZE: usize = 1024;

const SECTOR_SIZE: usize = 512;
const END_OF_ATTRIBUTES: u32 = 0xFFFF_FFFF;

/// Entry number + sequence number of one record generation.
///
/// Rendered as `XXXXXXXX-XXXXXXXX` (hex entry, hex sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize)]
pub struct MftKey {
    pub entry_number: u64,
    pub sequence_number: u16,
}

impl MftKey {
    pub const ENTRY_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

    pub const fn new(entry_number: u64, sequence_number: u16) -> Self {
        Self {
            entry_number,
            sequence_number,
        }
    }

    /// Unpack an on-disk file reference (48-bit entry, 16-bit sequence).
    pub const fn from_reference(raw: u64) -> Self {
        Self {
            entry_number: raw & Self::ENTRY_MASK,
            sequence_number: (raw >> 48) as u16,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.entry_number == 0 && self.sequence_number == 0
    }
}

impl fmt::Display for MftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}-{:08X}", self.entry_number, self.sequence_number)
    }
}

/// Header found at the very beginning of every **FILE** record (offset 0).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileRecordHeader {
    pub signature: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_file_record: u64,
    pub next_attr_id: u16,
    /// Only present in the NTFS 3.1 header layout.
    pub record_number: Option<u32>,
}

impl FileRecordHeader {
    pub const FILE_SIGNATURE: [u8; 4] = *b"FILE";
    pub const BAAD_SIGNATURE: [u8; 4] = *b"BAAD";

    fn parse(raw: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(raw);
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        let usa_offset = cursor.read_u16::<LittleEndian>()?;
        let usa_count = cursor.read_u16::<LittleEndian>()?;
        let lsn = cursor.read_u64::<LittleEndian>()?;
        let sequence_number = cursor.read_u16::<LittleEndian>()?;
        let hard_link_count = cursor.read_u16::<LittleEndian>()?;
        let attrs_offset = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let bytes_in_use = cursor.read_u32::<LittleEndian>()?;
        let bytes_allocated = cursor.read_u32::<LittleEndian>()?;
        let base_file_record = cursor.read_u64::<LittleEndian>()?;
        let next_attr_id = cursor.read_u16::<LittleEndian>()?;
        let record_number = if usa_offset >= 0x30 {
            cursor.set_position(0x2C);
            Some(cursor.read_u32::<LittleEndian>()?)
        } else {
            None
        };
        Ok(FileRecordHeader {
            signature,
            usa_offset,
            usa_count,
            lsn,
            sequence_number,
            hard_link_count,
            attrs_offset,
            flags,
            bytes_in_use,
            bytes_allocated,
            base_file_record,
            next_attr_id,
            record_number,
        })
    }
}

/// Which bucket of the [`crate::Mft`] a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RecordStatus {
    InUse,
    Bad,
    Uninitialized,
    Free,
}

/// One decoded 1 KiB MFT slot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileRecord {
    /// Byte position of the slot in the MFT image.
    pub offset: u64,
    pub entry_number: u64,
    pub sequence_number: u16,
    pub entry_flags: u16,
    /// Zero key for a base record.
    pub base_record_reference: MftKey,
    pub header: FileRecordHeader,
    pub attributes: Vec<Attribute>,
    pub is_bad: bool,
    pub is_uninitialized: bool,
    /// Set by [`crate::Mft`] when an earlier slot already holds this key.
    #[serde(default)]
    pub is_duplicate: bool,
}

// At the end of every 512‑byte sector NTFS overwrites the last two bytes with the Update‑Sequence Number (USN).
fn apply_fixups(buf: &mut [u8], usa_offset: usize, usa_count: usize) -> Result<(), String> {
    if usa_count == 0 {
        return Ok(());
    }
    if usa_offset + 2 * usa_count > buf.len() {
        return Err("update sequence array lies outside the record".into());
    }
    if (usa_count - 1) * SECTOR_SIZE > buf.len() {
        return Err(format!(
            "update sequence array covers {} sectors, record has {}",
            usa_count - 1,
            buf.len() / SECTOR_SIZE
        ));
    }

    let usn = [buf[usa_offset], buf[usa_offset + 1]];
    for i in 1..usa_count {
        let sector_end = i * SECTOR_SIZE - 2;
        if buf[sector_end] != usn[0] || buf[sector_end + 1] != usn[1] {
            return Err(format!("update sequence mismatch at sector {}", i));
        }
        let fix_pos = usa_offset + 2 * i;
        buf[sector_end] = buf[fix_pos];
        buf[sector_end + 1] = buf[fix_pos + 1];
    }
    Ok(())
}

impl FileRecord {
    pub const FLAG_IN_USE: u16 = 0x0001;
    pub const FLAG_DIRECTORY: u16 = 0x0002;

    /// Decode one slot. Never fails: problems end up as a bad classification,
    /// or as dropped attributes, and are handed to `diagnostics`.
    pub fn from_bytes(raw: &[u8], offset: u64, diagnostics: &dyn Diagnostics) -> Self {
        let fallback_entry = offset / RECORD_SIZE as u64;
        let mut record = FileRecord {
            offset,
            entry_number: fallback_entry,
            sequence_number: 0,
            entry_flags: 0,
            base_record_reference: MftKey::default(),
            header: FileRecordHeader::default(),
            attributes: Vec::new(),
            is_bad: false,
            is_uninitialized: false,
            is_duplicate: false,
        };

        if raw.len() < RECORD_SIZE {
            record.is_bad = true;
            diagnostics.report(&MftError::MalformedRecord {
                offset,
                reason: format!("slot is only {} bytes", raw.len()),
            });
            return record;
        }
        let raw = &raw[..RECORD_SIZE];

        if raw[..4] == [0u8; 4] {
            trace!("Slot at 0x{:X} was never initialized.", offset);
            record.is_uninitialized = true;
            return record;
        }

        let header = match FileRecordHeader::parse(raw) {
            Ok(h) => h,
            Err(e) => {
                record.is_bad = true;
                diagnostics.report(&MftError::MalformedRecord {
                    offset,
                    reason: e.to_string(),
                });
                return record;
            }
        };

        if header.signature != FileRecordHeader::FILE_SIGNATURE
            && header.signature != FileRecordHeader::BAAD_SIGNATURE
        {
            record.is_bad = true;
            diagnostics.report(&MftError::MalformedRecord {
                offset,
                reason: format!(
                    "signature is not 'FILE', found: {}",
                    String::from_utf8_lossy(&header.signature)
                ),
            });
            record.header = header;
            return record;
        }

        record.entry_number = header
            .record_number
            .map(u64::from)
            .unwrap_or(fallback_entry);
        record.sequence_number = header.sequence_number;
        record.entry_flags = header.flags;
        record.base_record_reference = MftKey::from_reference(header.base_file_record);

        if header.signature == FileRecordHeader::BAAD_SIGNATURE {
            record.is_bad = true;
            diagnostics.report(&MftError::MalformedRecord {
                offset,
                reason: "record is marked 'BAAD'".into(),
            });
            record.header = header;
            return record;
        }

        // we need a mutable copy so we can patch the USNs in‑place
        let mut buf = raw.to_vec();
        if let Err(reason) = apply_fixups(
            &mut buf,
            header.usa_offset as usize,
            header.usa_count as usize,
        ) {
            record.is_bad = true;
            diagnostics.report(&MftError::MalformedRecord { offset, reason });
            record.header = header;
            return record;
        }

        record.attributes = parse_attributes(&buf, &header, offset, diagnostics);
        debug!(
            "offset: 0x{:X} flags: 0x{:X} key: {} attributes: {}",
            offset,
            record.entry_flags,
            record.key(),
            record.attributes.len()
        );
        record.header = header;
        record
    }

    pub fn key(&self) -> MftKey {
        MftKey::new(self.entry_number, self.sequence_number)
    }

    /// Classification with precedence in-use > bad > uninitialized > free.
    /// A duplicate slot is bad whatever its flags say.
    pub fn status(&self) -> RecordStatus {
        if self.is_duplicate {
            RecordStatus::Bad
        } else if self.entry_flags & Self::FLAG_IN_USE != 0 {
            RecordStatus::InUse
        } else if self.is_bad {
            RecordStatus::Bad
        } else if self.is_uninitialized {
            RecordStatus::Uninitialized
        } else {
            RecordStatus::Free
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.status() == RecordStatus::InUse
    }

    pub fn is_dir(&self) -> bool {
        self.entry_flags & Self::FLAG_DIRECTORY != 0
    }

    /// `false` for extension records that hold overflow attributes of another record.
    pub fn is_base_record(&self) -> bool {
        self.base_record_reference.is_zero()
    }

    pub fn attributes_of(&self, attr_type: AttributeType) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(move |a| a.attr_type() == attr_type)
    }

    /// Every $FILE_NAME with the number of the attribute carrying it.
    pub fn file_names(&self) -> impl Iterator<Item = (u16, &FileName)> {
        self.attributes
            .iter()
            .filter_map(|a| a.file_name().map(|f| (a.header.id, f)))
    }

    pub fn standard_information(&self) -> Option<&StandardInformation> {
        self.attributes.iter().find_map(|a| match &a.value {
            AttributeValue::StandardInformation(si) => Some(si),
            _ => None,
        })
    }

    /// Name used to label this record when it is reached as an ancestor:
    /// DosWindows, else Windows, else Posix. DOS short names never qualify.
    pub fn canonical_name(&self) -> Option<&FileName> {
        [
            NameNamespace::DosWindows,
            NameNamespace::Windows,
            NameNamespace::Posix,
        ]
        .into_iter()
        .find_map(|ns| {
            self.file_names()
                .map(|(_, f)| f)
                .find(|f| f.namespace == ns)
        })
    }

    /// Named $DATA attributes (alternate data streams).
    pub fn data_streams(&self) -> Vec<DataStream> {
        self.attributes_of(AttributeType::Data)
            .filter_map(|a| {
                a.header.name.as_ref().map(|name| DataStream {
                    name: name.clone(),
                    size: a.content_size(),
                    resident: a.is_resident(),
                    attribute_id: a.header.id,
                })
            })
            .collect()
    }
}

/// Walk the attributes after the fixed header until the end marker or the
/// end of the used part of the record.
fn parse_attributes(
    buf: &[u8],
    header: &FileRecordHeader,
    offset: u64,
    diagnostics: &dyn Diagnostics,
) -> Vec<Attribute> {
    let used = match header.bytes_in_use as usize {
        0 => buf.len(),
        n => n.min(buf.len()),
    };
    let mut attributes = Vec::new();
    let mut pos = header.attrs_offset as usize;

    while pos + 8 <= used {
        let attr_type = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
        if attr_type == END_OF_ATTRIBUTES {
            break;
        }
        let length =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]) as usize;
        if length < 0x10 {
            diagnostics.report(&MftError::MalformedRecord {
                offset,
                reason: format!("attribute at 0x{:X} has length 0x{:X}", pos, length),
            });
            break;
        }

        let end = pos.saturating_add(length).min(used);
        match Attribute::from_bytes(&buf[pos..end]) {
            Ok(attr) => attributes.push(attr),
            Err(reason) => diagnostics.report(&MftError::TruncatedAttribute {
                offset,
                attribute_type: AttributeType::from(attr_type),
                reason,
            }),
        }
        pos = pos.saturating_add(length);
    }
    attributes
}
