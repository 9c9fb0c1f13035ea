// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://flatcap.github.io/linux-ntfs/ntfs/concepts/data_runs.html

//! Attribute content: inline (resident) bytes or the data runs that address
//! non-resident content on the volume. Cluster contents are never read here.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Content of a resident attribute, copied out of the record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResidentData {
    pub data: Vec<u8>,
}

impl ResidentData {
    /// Copy `length` bytes at `offset` out of the attribute bytes.
    pub fn from_bytes(attr: &[u8], offset: usize, length: usize) -> Result<Self, String> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| "content length overflows".to_string())?;
        if end > attr.len() {
            return Err(format!(
                "content 0x{:X}..0x{:X} exceeds attribute length 0x{:X}",
                offset,
                end,
                attr.len()
            ));
        }
        Ok(Self {
            data: attr[offset..end].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One contiguous extent of a non-resident attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataRun {
    /// Absolute logical cluster number, `None` for a sparse run.
    pub lcn: Option<i64>,
    /// Length in clusters.
    pub length: u64,
}

/// Header fields and run list of a non-resident attribute.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NonResidentData {
    pub starting_vcn: u64,
    pub ending_vcn: u64,
    pub mapping_pairs_offset: u16,
    /// Log2 of the compression unit in clusters, 0 when uncompressed.
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub real_size: u64,
    pub initialized_size: u64,
    pub data_runs: Vec<DataRun>,
}

impl NonResidentData {
    /// Size of the fixed non-resident header including the common part.
    pub const HEADER_LENGTH: usize = 0x40;

    /// Decode from the full attribute bytes (common header included).
    pub fn from_bytes(attr: &[u8]) -> Result<Self, String> {
        if attr.len() < Self::HEADER_LENGTH {
            return Err(format!(
                "non-resident header needs 0x{:X} bytes, attribute has 0x{:X}",
                Self::HEADER_LENGTH,
                attr.len()
            ));
        }
        let mut cur = Cursor::new(attr);
        cur.set_position(0x10);
        let starting_vcn = cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
        let ending_vcn = cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
        let mapping_pairs_offset = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
        let compression_unit = cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?;
        cur.set_position(0x28);
        let allocated_size = cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
        let real_size = cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
        let initialized_size = cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;

        let runs_start = mapping_pairs_offset as usize;
        if runs_start > attr.len() {
            return Err(format!(
                "mapping pairs offset 0x{:X} is past the attribute end 0x{:X}",
                runs_start,
                attr.len()
            ));
        }
        let data_runs =
            decode_data_runs(&attr[runs_start..]).map_err(|e| format!("data runs: {}", e))?;

        Ok(Self {
            starting_vcn,
            ending_vcn,
            mapping_pairs_offset,
            compression_unit,
            allocated_size,
            real_size,
            initialized_size,
            data_runs,
        })
    }

    /// Total clusters covered by the run list, sparse runs included.
    pub fn cluster_count(&self) -> u64 {
        self.data_runs.iter().map(|r| r.length).sum()
    }
}

/// Decode a mapping-pairs array into absolute runs.
///
/// Each pair starts with a header byte: the low nibble is the byte width of
/// the run length, the high nibble the width of the signed LCN delta. A zero
/// header ends the list.
pub fn decode_data_runs(raw: &[u8]) -> Result<Vec<DataRun>, String> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut cur_lcn: i64 = 0;
    while pos < raw.len() && raw[pos] != 0 {
        let hdr = raw[pos];
        pos += 1;
        let len_sz = (hdr & 0x0F) as usize;
        let ofs_sz = (hdr >> 4) as usize;
        if len_sz == 0 || len_sz > 8 || ofs_sz > 8 {
            return Err(format!("invalid run header 0x{:02X} at 0x{:X}", hdr, pos - 1));
        }
        if pos + len_sz + ofs_sz > raw.len() {
            return Err(format!("run at 0x{:X} extends beyond the run list", pos - 1));
        }

        let mut run_len = 0u64;
        for (i, b) in raw[pos..pos + len_sz].iter().enumerate() {
            run_len |= (*b as u64) << (8 * i);
        }
        pos += len_sz;

        if ofs_sz == 0 {
            out.push(DataRun {
                lcn: None,
                length: run_len,
            });
            continue;
        }

        let mut ofs = 0i64;
        for (i, b) in raw[pos..pos + ofs_sz].iter().enumerate() {
            ofs |= (*b as i64) << (8 * i);
        }
        // sign-extend negative deltas
        if ofs_sz < 8 && raw[pos + ofs_sz - 1] & 0x80 != 0 {
            ofs |= !0i64 << (ofs_sz * 8);
        }
        pos += ofs_sz;

        cur_lcn = cur_lcn.wrapping_add(ofs);
        out.push(DataRun {
            lcn: Some(cur_lcn),
            length: run_len,
        });
    }
    Ok(out)
}
