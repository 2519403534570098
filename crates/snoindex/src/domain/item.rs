// Copyright 2025 Snoindex Project
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

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record as it should appear in the search engine.
///
/// `version` always comes from the source system (the transaction `xid`) and is
/// used as the external version of the indexed document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub data: Value,
    pub version: u64,
    pub uuid: String,
    pub index: String,
}

impl Item {
    /// Build an item from a raw index-data view, taking the target index from
    /// the payload's `item_type` field.
    pub fn from_index_data(uuid: &str, version: u64, data: Value) -> crate::Result<Self> {
        let index = data
            .get("item_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                crate::SnoindexError::DataShape(format!("item {} has no item_type", uuid))
            })?
            .to_string();
        Ok(Self {
            data,
            version,
            uuid: uuid.to_string(),
            index,
        })
    }
}
