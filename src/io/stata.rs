//! Minimal reader for Stata `.dta` files (formats 117 and 118).
//!
//! The language-proximity reference table ships in Stata's native format.
//! Only the plain row/column data is extracted; value labels, expansion
//! fields, and anything executable-adjacent are ignored entirely.

use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::io::tabular::RawTable;

const TYPE_DOUBLE: u16 = 65526;
const TYPE_FLOAT: u16 = 65527;
const TYPE_LONG: u16 = 65528;
const TYPE_INT: u16 = 65529;
const TYPE_BYTE: u16 = 65530;
const TYPE_STRL: u16 = 32768;

pub fn read_dta(path: &Path) -> Result<RawTable> {
    let bytes = std::fs::read(path)?;
    parse_dta(&bytes)
}

struct Layout {
    /// Bytes reserved per variable name (117: 33, 118: 129)
    varname_len: usize,
    /// Observation count field width (117: u32, 118: u64)
    wide_n: bool,
}

pub fn parse_dta(bytes: &[u8]) -> Result<RawTable> {
    let mut pos = expect_tag(bytes, 0, b"<stata_dta><header><release>")?;
    let release = std::str::from_utf8(slice(bytes, pos, 3)?)
        .map_err(|_| stata_err("release field is not ASCII"))?;
    let layout = match release {
        "117" => Layout { varname_len: 33, wide_n: false },
        "118" => Layout { varname_len: 129, wide_n: true },
        other => {
            return Err(stata_err(&format!(
                "unsupported dta release '{}' (only 117/118)",
                other
            )))
        }
    };
    pos += 3;
    pos = expect_tag(bytes, pos, b"</release><byteorder>")?;
    let order = slice(bytes, pos, 3)?;
    if order != b"LSF" {
        return Err(stata_err("only little-endian (LSF) dta files are supported"));
    }
    pos += 3;
    pos = expect_tag(bytes, pos, b"</byteorder><K>")?;
    let k = read_u16(bytes, pos)? as usize;
    pos += 2;
    pos = expect_tag(bytes, pos, b"</K><N>")?;
    let n = if layout.wide_n {
        read_u64(bytes, pos)? as usize
    } else {
        read_u32(bytes, pos)? as usize
    };

    // The <map> section carries absolute offsets for every other section;
    // jump through it rather than parsing the header tail.
    let map_pos = find(bytes, b"<map>", pos).ok_or_else(|| stata_err("missing <map> section"))?;
    let mut offsets = [0u64; 14];
    let mut off_pos = map_pos + b"<map>".len();
    for slot in offsets.iter_mut() {
        *slot = read_u64(bytes, off_pos)?;
        off_pos += 8;
    }

    let mut pos = expect_tag(bytes, offsets[2] as usize, b"<variable_types>")?;
    let mut types = Vec::with_capacity(k);
    for _ in 0..k {
        types.push(read_u16(bytes, pos)?);
        pos += 2;
    }

    let mut pos = expect_tag(bytes, offsets[3] as usize, b"<varnames>")?;
    let mut headers = Vec::with_capacity(k);
    for _ in 0..k {
        let raw = slice(bytes, pos, layout.varname_len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        headers.push(String::from_utf8_lossy(&raw[..end]).into_owned());
        pos += layout.varname_len;
    }

    let mut pos = expect_tag(bytes, offsets[9] as usize, b"<data>")?;
    let mut rows = Vec::with_capacity(n);
    for _ in 0..n {
        let mut row = Vec::with_capacity(k);
        for &ty in &types {
            let (value, width) = decode_cell(bytes, pos, ty)?;
            row.push(value);
            pos += width;
        }
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}

fn decode_cell(bytes: &[u8], pos: usize, ty: u16) -> Result<(String, usize)> {
    match ty {
        1..=2045 => {
            let width = ty as usize;
            let raw = slice(bytes, pos, width)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Ok((String::from_utf8_lossy(&raw[..end]).trim().to_string(), width))
        }
        TYPE_STRL => Err(stata_err("strL variables are not supported")),
        TYPE_DOUBLE => {
            let v = f64::from_le_bytes(slice(bytes, pos, 8)?.try_into().unwrap());
            Ok((render_numeric(v, v >= 8.988e307), 8))
        }
        TYPE_FLOAT => {
            let v = f32::from_le_bytes(slice(bytes, pos, 4)?.try_into().unwrap()) as f64;
            Ok((render_numeric(v, v >= 1.701e38), 4))
        }
        TYPE_LONG => {
            let v = i32::from_le_bytes(slice(bytes, pos, 4)?.try_into().unwrap());
            Ok((render_numeric(v as f64, v > 2_147_483_620), 4))
        }
        TYPE_INT => {
            let v = i16::from_le_bytes(slice(bytes, pos, 2)?.try_into().unwrap());
            Ok((render_numeric(v as f64, v > 32_740), 2))
        }
        TYPE_BYTE => {
            let v = bytes.get(pos).copied().ok_or_else(truncated)? as i8;
            Ok((render_numeric(v as f64, v > 100), 1))
        }
        other => Err(stata_err(&format!("unknown variable type {}", other))),
    }
}

/// Stata encodes missing values as sentinels above the valid range; they
/// come out as empty cells, the same missing marker the CSV readers produce.
fn render_numeric(v: f64, missing: bool) -> String {
    if missing || v.is_nan() {
        String::new()
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn expect_tag(bytes: &[u8], pos: usize, tag: &[u8]) -> Result<usize> {
    if bytes.len() < pos + tag.len() || &bytes[pos..pos + tag.len()] != tag {
        return Err(stata_err(&format!(
            "expected '{}' at offset {}",
            String::from_utf8_lossy(tag),
            pos
        )));
    }
    Ok(pos + tag.len())
}

fn find(bytes: &[u8], pat: &[u8], from: usize) -> Option<usize> {
    bytes[from..]
        .windows(pat.len())
        .position(|w| w == pat)
        .map(|p| p + from)
}

fn slice(bytes: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    bytes.get(pos..pos + len).ok_or_else(truncated)
}

fn truncated() -> PipelineError {
    stata_err("file truncated")
}

fn stata_err(msg: &str) -> PipelineError {
    PipelineError::Stata(msg.to_string())
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16> {
    Ok(u16::from_le_bytes(slice(bytes, pos, 2)?.try_into().unwrap()))
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32> {
    Ok(u32::from_le_bytes(slice(bytes, pos, 4)?.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], pos: usize) -> Result<u64> {
    Ok(u64::from_le_bytes(slice(bytes, pos, 8)?.try_into().unwrap()))
}
