// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::data::{NonResidentData, ResidentData};
use crate::record::MftKey;

/// Attribute type codes. Codes outside the documented set decode to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    Unknown(u32),
}

impl From<u32> for AttributeType {
    fn from(value: u32) -> Self {
        use AttributeType::*;
        match value {
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => EaInformation,
            0xE0 => Ea,
            0xF0 => PropertySet,
            0x100 => LoggedUtilityStream,
            other => Unknown(other),
        }
    }
}

impl AttributeType {
    pub fn code(&self) -> u32 {
        use AttributeType::*;
        match self {
            StandardInformation => 0x10,
            AttributeList => 0x20,
            FileName => 0x30,
            ObjectId => 0x40,
            SecurityDescriptor => 0x50,
            VolumeName => 0x60,
            VolumeInformation => 0x70,
            Data => 0x80,
            IndexRoot => 0x90,
            IndexAllocation => 0xA0,
            Bitmap => 0xB0,
            ReparsePoint => 0xC0,
            EaInformation => 0xD0,
            Ea => 0xE0,
            PropertySet => 0xF0,
            LoggedUtilityStream => 0x100,
            Unknown(code) => *code,
        }
    }
}

/// Common header shared by resident and non‑resident attributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttributeHeader {
    pub attr_type: AttributeType,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    /// Attribute number, unique within the record.
    pub id: u16,
    pub name: Option<String>,
}

impl AttributeHeader {
    pub const LENGTH: usize = 0x10;

    fn parse(raw: &[u8]) -> Result<Self, String> {
        if raw.len() < Self::LENGTH {
            return Err(format!("attribute header needs 0x10 bytes, got 0x{:X}", raw.len()));
        }
        let mut cur = Cursor::new(raw);
        let attr_type = AttributeType::from(cur.read_u32::<LittleEndian>().map_err(|e| e.to_string())?);
        let length = cur.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        let non_resident = cur.read_u8().map_err(|e| e.to_string())? != 0;
        let name_length = cur.read_u8().map_err(|e| e.to_string())?;
        let name_offset = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
        let flags = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
        let id = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;

        let name = if name_length > 0 {
            let start = name_offset as usize;
            let end = start + name_length as usize * 2;
            if end > raw.len() {
                return Err(format!("attribute name 0x{:X}..0x{:X} is out of bounds", start, end));
            }
            Some(utf16_le(&raw[start..end]))
        } else {
            None
        };

        Ok(Self {
            attr_type,
            length,
            non_resident,
            name_length,
            name_offset,
            flags,
            id,
            name,
        })
    }
}

/// Where the attribute content lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Content {
    Resident(ResidentData),
    NonResident(NonResidentData),
}

/// Typed interpretation of an attribute, picked from its type code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum AttributeValue {
    StandardInformation(StandardInformation),
    /// Entries of a resident list. A non‑resident list keeps its entries on
    /// the volume and decodes to an empty vector.
    AttributeList(Vec<AttributeListEntry>),
    FileName(FileName),
    /// Stream bytes (or their runs) are in [`Attribute::content`].
    Data,
    /// Any other type, raw bytes are in [`Attribute::content`].
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attribute {
    pub header: AttributeHeader,
    pub content: Content,
    pub value: AttributeValue,
}

impl Attribute {
    /// Decode one attribute. `raw` starts at the attribute header and ends at
    /// its declared length (or the end of the usable record, if shorter).
    pub fn from_bytes(raw: &[u8]) -> Result<Self, String> {
        let header = AttributeHeader::parse(raw)?;

        let content = if header.non_resident {
            Content::NonResident(NonResidentData::from_bytes(raw)?)
        } else {
            if raw.len() < 0x18 {
                return Err("resident header is truncated".into());
            }
            let mut cur = Cursor::new(raw);
            cur.set_position(0x10);
            let value_length = cur.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
            let value_offset = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
            Content::Resident(ResidentData::from_bytes(
                raw,
                value_offset as usize,
                value_length as usize,
            )?)
        };

        let value = match (&header.attr_type, &content) {
            (AttributeType::StandardInformation, Content::Resident(r)) => {
                AttributeValue::StandardInformation(StandardInformation::from_bytes(&r.data)?)
            }
            (AttributeType::FileName, Content::Resident(r)) => {
                AttributeValue::FileName(FileName::from_bytes(&r.data)?)
            }
            (AttributeType::StandardInformation | AttributeType::FileName, Content::NonResident(_)) => {
                return Err(format!("{:?} must be resident", header.attr_type));
            }
            (AttributeType::AttributeList, Content::Resident(r)) => {
                AttributeValue::AttributeList(AttributeListEntry::parse_all(&r.data)?)
            }
            (AttributeType::AttributeList, Content::NonResident(_)) => {
                AttributeValue::AttributeList(Vec::new())
            }
            (AttributeType::Data, _) => AttributeValue::Data,
            _ => AttributeValue::Other,
        };

        Ok(Self {
            header,
            content,
            value,
        })
    }

    pub fn attr_type(&self) -> AttributeType {
        self.header.attr_type
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.content, Content::Resident(_))
    }

    pub fn resident_data(&self) -> Option<&ResidentData> {
        match &self.content {
            Content::Resident(r) => Some(r),
            Content::NonResident(_) => None,
        }
    }

    pub fn non_resident_data(&self) -> Option<&NonResidentData> {
        match &self.content {
            Content::NonResident(n) => Some(n),
            Content::Resident(_) => None,
        }
    }

    pub fn file_name(&self) -> Option<&FileName> {
        match &self.value {
            AttributeValue::FileName(f) => Some(f),
            _ => None,
        }
    }

    /// Logical size of the content in bytes.
    pub fn content_size(&self) -> u64 {
        match &self.content {
            Content::Resident(r) => r.len() as u64,
            Content::NonResident(n) => n.real_size,
        }
    }
}

fn utf16_le(raw: &[u8]) -> String {
    String::from_utf16_lossy(
        &raw.chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect::<Vec<_>>(),
    )
}

/// FILETIME (100ns ticks since 1601) to UTC. Zero and out of range values give `None`.
pub fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    if ft == 0 {
        return None;
    }
    const DELTA_MICROS: i64 = 11_644_473_600_000_000;
    let unix_micros = (ft / 10) as i64 - DELTA_MICROS;
    let secs = unix_micros.div_euclid(1_000_000);
    let nanos = (unix_micros.rem_euclid(1_000_000) * 1_000) as u32 + (ft % 10) as u32 * 100;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Parsed $STANDARD_INFORMATION (v1.2 fields optional).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardInformation {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub file_attrs: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub usn: Option<u64>,
}

impl StandardInformation {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, String> {
        if raw.len() < 0x30 {
            return Err(format!(
                "$STANDARD_INFORMATION needs 0x30 bytes, got 0x{:X}",
                raw.len()
            ));
        }
        let mut cur = Cursor::new(raw);
        let mut next_u64 = || cur.read_u64::<LittleEndian>().map_err(|e| e.to_string());
        let created = filetime_to_datetime(next_u64()?);
        let modified = filetime_to_datetime(next_u64()?);
        let mft_modified = filetime_to_datetime(next_u64()?);
        let accessed = filetime_to_datetime(next_u64()?);

        let u32_at = |off: usize| -> Option<u32> {
            raw.get(off..off + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        let u64_at = |off: usize| -> Option<u64> {
            raw.get(off..off + 8).map(|b| {
                let mut a = [0u8; 8];
                a.copy_from_slice(b);
                u64::from_le_bytes(a)
            })
        };

        Ok(Self {
            created,
            modified,
            mft_modified,
            accessed,
            file_attrs: u32_at(0x20).unwrap_or_default(),
            max_versions: u32_at(0x24).unwrap_or_default(),
            version_number: u32_at(0x28).unwrap_or_default(),
            class_id: u32_at(0x2C).unwrap_or_default(),
            owner_id: u32_at(0x30),
            security_id: u32_at(0x34),
            quota_charged: u64_at(0x38),
            usn: u64_at(0x40),
        })
    }
}

/// Which naming rules a $FILE_NAME obeys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum NameNamespace {
    Posix,
    Windows,
    Dos,
    DosWindows,
}

impl NameNamespace {
    fn from_u8(value: u8) -> Result<Self, String> {
        Ok(match value {
            0 => NameNamespace::Posix,
            1 => NameNamespace::Windows,
            2 => NameNamespace::Dos,
            3 => NameNamespace::DosWindows,
            other => return Err(format!("unknown file name namespace {}", other)),
        })
    }
}

/// Parsed $FILE_NAME attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileName {
    pub parent_reference: MftKey,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub reparse_value: u32,
    pub namespace: NameNamespace,
    pub name: String,
}

impl FileName {
    pub const FLAG_IS_DIRECTORY: u32 = 0x1000_0000;
    const NAME_OFFSET: usize = 0x42;

    pub fn from_bytes(raw: &[u8]) -> Result<Self, String> {
        if raw.len() < Self::NAME_OFFSET {
            return Err(format!("$FILE_NAME needs 0x42 bytes, got 0x{:X}", raw.len()));
        }
        let mut cur = Cursor::new(raw);
        let mut next_u64 = || cur.read_u64::<LittleEndian>().map_err(|e| e.to_string());
        let parent_reference = MftKey::from_reference(next_u64()?);
        let created = filetime_to_datetime(next_u64()?);
        let modified = filetime_to_datetime(next_u64()?);
        let mft_modified = filetime_to_datetime(next_u64()?);
        let accessed = filetime_to_datetime(next_u64()?);
        let allocated_size = next_u64()?;
        let real_size = next_u64()?;
        let flags = cur.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        let reparse_value = cur.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        let name_len = cur.read_u8().map_err(|e| e.to_string())? as usize;
        let namespace = NameNamespace::from_u8(cur.read_u8().map_err(|e| e.to_string())?)?;

        let end = Self::NAME_OFFSET + name_len * 2;
        if raw.len() < end {
            return Err(format!(
                "file name of {} characters runs past the content (0x{:X} bytes)",
                name_len,
                raw.len()
            ));
        }
        let name = utf16_le(&raw[Self::NAME_OFFSET..end]);

        Ok(Self {
            parent_reference,
            created,
            modified,
            mft_modified,
            accessed,
            allocated_size,
            real_size,
            flags,
            reparse_value,
            namespace,
            name,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags & Self::FLAG_IS_DIRECTORY != 0
    }
}

/// One entry of a resident $ATTRIBUTE_LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeListEntry {
    pub attr_type: AttributeType,
    pub record_length: u16,
    pub name: Option<String>,
    pub starting_vcn: u64,
    /// Record that holds the listed attribute.
    pub segment_reference: MftKey,
    pub attribute_id: u16,
}

impl AttributeListEntry {
    const MIN_LENGTH: usize = 0x1A;

    fn parse_all(raw: &[u8]) -> Result<Vec<Self>, String> {
        let mut out = Vec::new();
        let mut off = 0usize;
        while off + Self::MIN_LENGTH <= raw.len() {
            let slice = &raw[off..];
            let mut cur = Cursor::new(slice);
            let attr_type = AttributeType::from(cur.read_u32::<LittleEndian>().map_err(|e| e.to_string())?);
            let record_length = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
            let name_length = cur.read_u8().map_err(|e| e.to_string())? as usize;
            let name_offset = cur.read_u8().map_err(|e| e.to_string())? as usize;
            let starting_vcn = cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
            let segment_reference =
                MftKey::from_reference(cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?);
            let attribute_id = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;

            if (record_length as usize) < Self::MIN_LENGTH || record_length as usize > slice.len() {
                return Err(format!(
                    "attribute list entry at 0x{:X} has invalid length 0x{:X}",
                    off, record_length
                ));
            }
            let name = if name_length > 0 {
                let end = name_offset + name_length * 2;
                if end > record_length as usize {
                    return Err(format!("attribute list entry name at 0x{:X} is out of bounds", off));
                }
                Some(utf16_le(&slice[name_offset..end]))
            } else {
                None
            };

            out.push(Self {
                attr_type,
                record_length,
                name,
                starting_vcn,
                segment_reference,
                attribute_id,
            });
            off += record_length as usize;
        }
        Ok(out)
    }
}

/// A named $DATA attribute (alternate data stream).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataStream {
    pub name: String,
    pub size: u64,
    pub resident: bool,
    pub attribute_id: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_name_content(parent: u64, name: &str, namespace: u8, flags: u32) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut raw = vec![0u8; 0x42 + units.len() * 2];
        raw[0..8].copy_from_slice(&parent.to_le_bytes());
        raw[0x08..0x10].copy_from_slice(&0x01D0_0000_0000_0000u64.to_le_bytes());
        raw[0x38..0x3C].copy_from_slice(&flags.to_le_bytes());
        raw[0x40] = units.len() as u8;
        raw[0x41] = namespace;
        for (i, u) in units.iter().enumerate() {
            raw[0x42 + i * 2..0x44 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        raw
    }

    fn resident_attribute(type_code: u32, id: u16, content: &[u8]) -> Vec<u8> {
        let length = (0x18 + content.len() + 7) & !7;
        let mut raw = vec![0u8; length];
        raw[0..4].copy_from_slice(&type_code.to_le_bytes());
        raw[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        raw[0x0E..0x10].copy_from_slice(&id.to_le_bytes());
        raw[0x10..0x14].copy_from_slice(&(content.len() as u32).to_le_bytes());
        raw[0x14..0x16].copy_from_slice(&0x18u16.to_le_bytes());
        raw[0x18..0x18 + content.len()].copy_from_slice(content);
        raw
    }

    #[test]
    fn file_name_with_parent_reference() {
        let parent = (3u64 << 48) | 0x2A;
        let content = file_name_content(parent, "report.docx", 1, 0x20);
        let fname = FileName::from_bytes(&content).unwrap();
        assert_eq!(fname.parent_reference, MftKey::new(0x2A, 3));
        assert_eq!(fname.name, "report.docx");
        assert_eq!(fname.namespace, NameNamespace::Windows);
        assert!(!fname.is_directory());
        assert!(fname.created.is_some());
        assert!(fname.modified.is_none());
    }

    #[test]
    fn unknown_type_codes_decode_to_other() {
        let raw = resident_attribute(0x1234, 9, &[0xAA, 0xBB]);
        let attr = Attribute::from_bytes(&raw).unwrap();
        assert_eq!(attr.attr_type(), AttributeType::Unknown(0x1234));
        assert_eq!(attr.value, AttributeValue::Other);
        assert_eq!(attr.resident_data().unwrap().data, vec![0xAA, 0xBB]);
        assert_eq!(attr.header.id, 9);
    }

    #[test]
    fn resident_content_past_attribute_end_is_an_error() {
        let mut raw = resident_attribute(0x80, 1, &[1, 2, 3, 4]);
        raw[0x10..0x14].copy_from_slice(&0x400u32.to_le_bytes());
        assert!(Attribute::from_bytes(&raw).is_err());
    }

    #[test]
    fn file_name_attribute_is_typed() {
        let content = file_name_content(5 | (5 << 48), "Windows", 3, FileName::FLAG_IS_DIRECTORY);
        let raw = resident_attribute(0x30, 2, &content);
        let attr = Attribute::from_bytes(&raw).unwrap();
        let fname = attr.file_name().unwrap();
        assert_eq!(fname.namespace, NameNamespace::DosWindows);
        assert!(fname.is_directory());
    }

    #[test]
    fn attribute_list_entries() {
        let mut content = vec![0u8; 0x20 * 2];
        for (i, (code, seg)) in [(0x10u32, 40u64), (0x80u32, 41u64)].iter().enumerate() {
            let e = &mut content[i * 0x20..(i + 1) * 0x20];
            e[0..4].copy_from_slice(&code.to_le_bytes());
            e[4..6].copy_from_slice(&0x20u16.to_le_bytes());
            e[7] = 0x1A;
            e[0x10..0x18].copy_from_slice(&(seg | (1 << 48)).to_le_bytes());
            e[0x18..0x1A].copy_from_slice(&(i as u16).to_le_bytes());
        }
        let raw = resident_attribute(0x20, 4, &content);
        let attr = Attribute::from_bytes(&raw).unwrap();
        let AttributeValue::AttributeList(entries) = attr.value else {
            panic!("expected an attribute list");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].attr_type, AttributeType::Data);
        assert_eq!(entries[1].segment_reference, MftKey::new(41, 1));
    }

    #[test]
    fn filetime_conversion() {
        // 2021-01-01T00:00:00Z
        let dt = filetime_to_datetime(132_539_328_000_000_000).unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-01-01T00:00:00+00:00");
        assert!(filetime_to_datetime(0).is_none());
    }
}
