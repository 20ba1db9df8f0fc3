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

//! Resume-after positions for sequential pagination.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ConfigurationError;
use crate::sort::SortKey;
use crate::sort::SortMode;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CursorPosition {
    /// Primary key and id of the last hit of the previous page.
    KeyAndId { key: SortKey, id: String },
    /// The reduced backend's own marker for the last hit.
    Marker { values: Vec<String> },
    /// The full backend's `sort` array for the last hit, replayed verbatim.
    SortValues { values: Vec<Value> },
}

impl CursorPosition {
    /// The position as the reduced backend expects it.
    pub fn marker_values(&self) -> Vec<String> {
        match self {
            CursorPosition::KeyAndId { key, id } => vec![key.to_string(), id.clone()],
            CursorPosition::Marker { values } => values.clone(),
            CursorPosition::SortValues { values } => values
                .iter()
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    pub sort_mode: String,
    /// Fingerprint of the request filters the cursor was produced under.
    pub fingerprint: String,
    pub position: CursorPosition,
}

impl PaginationCursor {
    pub fn new(mode: &SortMode, fingerprint: impl Into<String>, position: CursorPosition) -> Self {
        Self {
            sort_mode: mode.id.to_string(),
            fingerprint: fingerprint.into(),
            position,
        }
    }

    /// Returns the position if this cursor may resume a query under `mode`
    /// with the given filter fingerprint.
    pub fn resume_under(
        &self,
        mode: &SortMode,
        fingerprint: &str,
    ) -> Result<&CursorPosition, ConfigurationError> {
        if self.sort_mode != mode.id {
            return Err(ConfigurationError::CursorSortMismatch {
                cursor: self.sort_mode.clone(),
                request: mode.id.to_string(),
            });
        }
        if self.fingerprint != fingerprint {
            return Err(ConfigurationError::StaleCursor);
        }
        Ok(&self.position)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(token: &str) -> Result<Self, ConfigurationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|err| ConfigurationError::InvalidCursor(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| ConfigurationError::InvalidCursor(err.to_string()))
    }
}
