// Copyright 2026 Recall Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport encoding for stored names and paths.
//!
//! `]` is the escape marker: `]]` stands for a literal `]` and `]` followed by
//! two hex digits stands for that byte.

const MARKER: u8 = b']';

pub fn encode(input: &str) -> String {
    encode_bytes(input.as_bytes())
}

/// Encodes raw bytes, escaping the marker, control bytes and any byte that is
/// not part of a valid UTF-8 sequence.
pub fn encode_bytes(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for chunk in input.utf8_chunks() {
        for ch in chunk.valid().chars() {
            if ch == ']' {
                out.push_str("]]");
            } else if ch.is_ascii_control() {
                push_escaped(&mut out, ch as u8);
            } else {
                out.push(ch);
            }
        }
        for byte in chunk.invalid() {
            push_escaped(&mut out, *byte);
        }
    }
    out
}

fn push_escaped(out: &mut String, byte: u8) {
    out.push(MARKER as char);
    out.push_str(&hex::encode([byte]));
}

/// Decodes an encoded string. Malformed escapes are kept as they are.
pub fn decode(input: &str) -> String {
    String::from_utf8_lossy(&decode_bytes(input)).into_owned()
}

pub fn decode_bytes(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != MARKER {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&MARKER) {
            out.push(MARKER);
            i += 2;
            continue;
        }
        match (hex_value(bytes.get(i + 1)), hex_value(bytes.get(i + 2))) {
            (Some(hi), Some(lo)) => {
                out.push(hi << 4 | lo);
                i += 3;
            }
            _ => {
                out.push(MARKER);
                i += 1;
            }
        }
    }
    out
}

fn hex_value(byte: Option<&u8>) -> Option<u8> {
    let byte = *byte?;
    (byte as char).to_digit(16).map(|v| v as u8)
}
