//! ASCII armor: base64 transport encoding with a CRC24 trailer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};

const ARMOR_BEGIN: &str = "-----BEGIN PGP MESSAGE-----";
const ARMOR_END: &str = "-----END PGP MESSAGE-----";

/// Base64 output characters per line.
const LINE_LEN: usize = 76;

/// CRC24 as specified for OpenPGP armor: polynomial 0x1864CFB, initial
/// value 0xB704CE, 24 low bits kept.
fn crc24(data: &[u8]) -> u32 {
    let mut crc: u32 = 0x00B7_04CE;
    for &b in data {
        crc ^= (b as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= 0x0186_4CFB;
            }
        }
    }
    crc & 0x00FF_FFFF
}

/// Armor `data` with optional `Key: Value` headers.
///
/// Header keys and values must be ASCII with no embedded newlines, and a
/// key must not contain `": "` — otherwise the decoded headers would not
/// match the encoded ones.
pub fn armor(data: &[u8], headers: &[(&str, &str)]) -> Result<String> {
    for (k, v) in headers {
        let bad = k.is_empty()
            || !k.is_ascii()
            || !v.is_ascii()
            || k.contains(": ")
            || k.contains('\n')
            || k.contains('\r')
            || v.contains('\n')
            || v.contains('\r');
        if bad {
            return Err(Error::ArgumentError);
        }
    }

    let mut out = String::new();
    out.push_str(ARMOR_BEGIN);
    out.push('\n');
    for (k, v) in headers {
        out.push_str(k);
        out.push_str(": ");
        out.push_str(v);
        out.push('\n');
    }
    out.push('\n');

    let b64 = STANDARD.encode(data);
    for chunk in b64.as_bytes().chunks(LINE_LEN) {
        // chunks of ASCII stay ASCII
        out.push_str(std::str::from_utf8(chunk).map_err(|_| Error::Bug)?);
        out.push('\n');
    }

    let crc = crc24(data);
    out.push('=');
    out.push_str(&STANDARD.encode(&crc.to_be_bytes()[1..]));
    out.push('\n');
    out.push_str(ARMOR_END);
    out.push('\n');
    Ok(out)
}

struct ParsedArmor {
    headers: Vec<(String, String)>,
    body_b64: String,
    crc_b64: String,
}

fn parse_armor(text: &str) -> Result<ParsedArmor> {
    let mut lines = text.lines();

    let mut found = false;
    for line in &mut lines {
        if line.trim_end_matches('\r') == ARMOR_BEGIN {
            found = true;
            break;
        }
    }
    if !found {
        return Err(Error::CorruptArmor);
    }

    let mut headers = Vec::new();
    let mut in_body = false;
    let mut body_b64 = String::new();
    let mut crc_b64: Option<String> = None;
    let mut ended = false;

    for line in lines {
        let line = line.trim_end_matches('\r');
        if !in_body {
            if line.is_empty() {
                in_body = true;
                continue;
            }
            let Some((k, v)) = line.split_once(": ") else {
                return Err(Error::CorruptArmor);
            };
            headers.push((k.to_string(), v.to_string()));
            continue;
        }
        if line == ARMOR_END {
            ended = true;
            break;
        }
        if let Some(rest) = line.strip_prefix('=') {
            if crc_b64.is_some() {
                return Err(Error::CorruptArmor);
            }
            crc_b64 = Some(rest.to_string());
            continue;
        }
        if crc_b64.is_some() || line.is_empty() {
            // data after the CRC line, or a blank line inside the body
            return Err(Error::CorruptArmor);
        }
        body_b64.push_str(line);
    }

    let crc_b64 = crc_b64.ok_or(Error::CorruptArmor)?;
    if !ended {
        return Err(Error::CorruptArmor);
    }
    Ok(ParsedArmor {
        headers,
        body_b64,
        crc_b64,
    })
}

/// Decode an armored message and verify its CRC24.
pub fn dearmor(text: &str) -> Result<Vec<u8>> {
    let parsed = parse_armor(text)?;
    let data = STANDARD
        .decode(parsed.body_b64.as_bytes())
        .map_err(|_| Error::CorruptArmor)?;
    let crc_bytes = STANDARD
        .decode(parsed.crc_b64.as_bytes())
        .map_err(|_| Error::CorruptArmor)?;
    if crc_bytes.len() != 3 {
        return Err(Error::CorruptArmor);
    }
    let crc = u32::from_be_bytes([0, crc_bytes[0], crc_bytes[1], crc_bytes[2]]);
    if crc24(&data) != crc {
        tracing::debug!("dearmor: crc mismatch");
        return Err(Error::CorruptArmor);
    }
    Ok(data)
}

/// The `Key: Value` header lines of an armored message, in order.
pub fn armor_headers(text: &str) -> Result<Vec<(String, String)>> {
    Ok(parse_armor(text)?.headers)
}
