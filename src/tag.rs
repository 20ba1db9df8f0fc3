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

//! User tags: a dotted label with an optional `#rrggbb` color suffix.

use serde::Serialize;

/// Luminance (0-255) above which tag text is drawn dark.
pub const DEFAULT_LUMINANCE_THRESHOLD: f32 = 50.0;

pub const TAG_SEPARATOR: char = '.';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn parse_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let bytes = hex::decode(hex).ok()?;
        Some(Self {
            r: bytes[0],
            g: bytes[1],
            b: bytes[2],
        })
    }

    pub fn luminance(&self) -> f32 {
        0.2126 * self.r as f32 + 0.7152 * self.g as f32 + 0.0722 * self.b as f32
    }

    pub fn to_hex(self) -> String {
        format!("#{}", hex::encode([self.r, self.g, self.b]))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Foreground {
    #[serde(rename = "#000")]
    Dark,
    #[serde(rename = "#fff")]
    Light,
}

impl Foreground {
    pub fn for_background(color: Color, threshold: f32) -> Self {
        if color.luminance() > threshold {
            Foreground::Dark
        } else {
            Foreground::Light
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// Stored value, used when filtering by this exact tag.
    pub raw: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground: Option<Foreground>,
}

impl Tag {
    pub fn decode(raw: &str, luminance_threshold: f32) -> Self {
        let (label, color) = split_color(raw);
        Self {
            raw: raw.to_string(),
            label: label.to_string(),
            color: color.map(Color::to_hex),
            foreground: color.map(|c| Foreground::for_background(c, luminance_threshold)),
        }
    }
}

/// Splits a stored tag into its label and trailing color. Both `a.b.#ff0000`
/// and `a.b#ff0000` yield the label `a.b`.
pub fn split_color(raw: &str) -> (&str, Option<Color>) {
    let Some((head, tail)) = raw.rsplit_once('#') else {
        return (raw, None);
    };
    match Color::parse_hex(tail) {
        Some(color) => (head.strip_suffix(TAG_SEPARATOR).unwrap_or(head), Some(color)),
        None => (raw, None),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagAction {
    Add,
    Remove,
}

/// A tag write against one document.
#[derive(Clone, Debug, PartialEq)]
pub struct TagMutation {
    pub doc_id: String,
    pub label: String,
    pub color: Option<Color>,
    pub action: TagAction,
}

impl TagMutation {
    pub fn stored_value(&self) -> String {
        match self.color {
            Some(color) => format!("{}{}{}", self.label, TAG_SEPARATOR, color.to_hex()),
            None => self.label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_both_suffix_forms() {
        let (label, color) = split_color("a.b.#ff0000");
        assert_eq!(label, "a.b");
        assert_eq!(color, Some(Color { r: 255, g: 0, b: 0 }));

        let (label, color) = split_color("a.b#00ff00");
        assert_eq!(label, "a.b");
        assert_eq!(color, Some(Color { r: 0, g: 255, b: 0 }));
    }

    #[test]
    fn labels_without_a_valid_suffix_keep_everything() {
        assert_eq!(split_color("plain"), ("plain", None));
        assert_eq!(split_color("issue#12"), ("issue#12", None));
        assert_eq!(split_color("x.#12345g"), ("x.#12345g", None));
    }

    #[test]
    fn foreground_follows_luminance() {
        let dark_bg = Tag::decode("t.#101010", DEFAULT_LUMINANCE_THRESHOLD);
        assert_eq!(dark_bg.foreground, Some(Foreground::Light));
        let light_bg = Tag::decode("t.#ffff00", DEFAULT_LUMINANCE_THRESHOLD);
        assert_eq!(light_bg.foreground, Some(Foreground::Dark));
        let uncolored = Tag::decode("t", DEFAULT_LUMINANCE_THRESHOLD);
        assert_eq!(uncolored.foreground, None);
        assert_eq!(uncolored.color, None);
    }

    #[test]
    fn threshold_is_respected() {
        // luminance of #404040 is 64
        let tag = Tag::decode("t.#404040", 40.0);
        assert_eq!(tag.foreground, Some(Foreground::Dark));
        let tag = Tag::decode("t.#404040", 128.0);
        assert_eq!(tag.foreground, Some(Foreground::Light));
    }

    #[test]
    fn mutation_stores_label_with_color() {
        let mutation = TagMutation {
            doc_id: "d1".to_string(),
            label: "work.urgent".to_string(),
            color: Color::parse_hex("ff8800"),
            action: TagAction::Add,
        };
        assert_eq!(mutation.stored_value(), "work.urgent.#ff8800");
    }
}
