// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Inbound purchase notifications and their structural validation.

use crate::base::{BuyerRef, PurchaseId};
use crate::error::RejectReason;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::warn;

/// Top-level sections every notification must carry.
pub const REQUIRED_SECTIONS: [&str; 3] = ["purchase", "user", "delivered_products"];

/// One inbound purchase document.
///
/// Expected shape:
///
/// ```json
/// {
///   "purchase": {"id": "123"},
///   "user": {"id": "98765"},
///   "delivered_products": [
///     {"id": "A", "content": [{"id": 1, "type": "number", "value": "50"}], "content_raw": "CODE-1"}
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseNotification {
    pub purchase_id: PurchaseId,
    pub buyer_ref: BuyerRef,
    pub delivered_items: Vec<DeliveredProduct>,
}

/// A fulfilled line item.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct DeliveredProduct {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: Vec<ContentEntry>,
    /// Redeemable code delivered with the product, if any.
    #[serde(default, deserialize_with = "lenient_text")]
    pub content_raw: Option<String>,
}

/// Typed content of a delivered product. Only `number` entries carry value.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ContentEntry {
    #[serde(default, rename = "type", deserialize_with = "lenient_text_or_empty")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub value: Value,
}

impl ContentEntry {
    pub fn is_number(&self) -> bool {
        self.kind == "number"
    }
}

impl PurchaseNotification {
    /// Decodes and validates a raw document.
    ///
    /// # Errors
    ///
    /// - [`RejectReason::MalformedDocument`] - not UTF-8 or not JSON.
    /// - [`RejectReason::StructuralError`] - a required section or id is missing.
    pub fn from_slice(raw: &[u8]) -> Result<Self, RejectReason> {
        let text =
            std::str::from_utf8(raw).map_err(|e| RejectReason::MalformedDocument(e.to_string()))?;
        let document: Value = serde_json::from_str(text)
            .map_err(|e| RejectReason::MalformedDocument(e.to_string()))?;
        Self::from_document(document)
    }

    /// Validates an already-decoded document.
    ///
    /// A delivered product that is not an object is dropped with a warning.
    /// Inside a product only the malformed content entries are dropped; its
    /// id, code and well-formed entries are kept.
    pub fn from_document(document: Value) -> Result<Self, RejectReason> {
        let Value::Object(mut document) = document else {
            return Err(structural(REQUIRED_SECTIONS.to_vec()));
        };

        let missing: Vec<&str> = REQUIRED_SECTIONS
            .into_iter()
            .filter(|section| !document.contains_key(*section))
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "notification is missing required sections");
            return Err(structural(missing));
        }

        let purchase_id = section_id(&document, "purchase")
            .map(PurchaseId)
            .ok_or_else(|| structural(vec!["purchase.id"]))?;
        let buyer_ref = section_id(&document, "user")
            .map(BuyerRef)
            .ok_or_else(|| structural(vec!["user.id"]))?;

        let products = match document.remove("delivered_products") {
            Some(Value::Array(products)) => products,
            _ => return Err(structural(vec!["delivered_products"])),
        };

        let delivered_items = products
            .into_iter()
            .enumerate()
            .filter_map(|(index, product)| match product {
                Value::Object(_) => match serde_json::from_value::<DeliveredProduct>(product) {
                    Ok(product) => Some(product),
                    Err(e) => {
                        warn!(%purchase_id, index, error = %e, "skipping malformed delivered product");
                        None
                    }
                },
                other => {
                    warn!(%purchase_id, index, product = %other, "skipping non-object delivered product");
                    None
                }
            })
            .collect();

        Ok(Self {
            purchase_id,
            buyer_ref,
            delivered_items,
        })
    }
}

fn structural(missing: Vec<&str>) -> RejectReason {
    RejectReason::StructuralError {
        missing: missing.into_iter().map(String::from).collect(),
    }
}

/// Reads `document[section].id` as a non-empty string.
fn section_id(document: &Map<String, Value>, section: &str) -> Option<String> {
    match document.get(section)?.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts string or numeric ids; anything else becomes empty.
fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Decodes content entries one by one, dropping only the malformed ones.
fn lenient_content<'de, D>(deserializer: D) -> Result<Vec<ContentEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match Value::deserialize(deserializer)? {
        Value::Array(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        other => {
            warn!(content = %other, "product content is not a list, ignoring it");
            return Ok(Vec::new());
        }
    };

    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry {
            Value::Object(_) => match serde_json::from_value::<ContentEntry>(entry) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(index, error = %e, "skipping malformed content entry");
                    None
                }
            },
            other => {
                warn!(index, entry = %other, "skipping non-object content entry");
                None
            }
        })
        .collect())
}

/// Strings pass through; anything else becomes empty.
fn lenient_text_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

/// Keeps non-empty strings only.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}
