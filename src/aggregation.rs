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

//! Value aggregation over delivered products.

use crate::ledger::Balance;
use crate::notification::DeliveredProduct;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// What one notification is worth.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregationResult {
    /// Sum of all counted numeric entries.
    pub total_value: Balance,
    /// Redeemable codes in encounter order, one per product that has one.
    pub codes: Vec<String>,
    /// `productId_itemId` keys already counted, in encounter order.
    pub dedup_keys: Vec<String>,
}

/// Sums the numeric content of `products`.
///
/// Entries that are not positive integers are skipped, as is any entry whose
/// `productId_itemId` key was already counted in this notification.
/// Malformed values are logged and skipped; aggregation itself never fails.
pub fn aggregate(products: &[DeliveredProduct]) -> AggregationResult {
    let mut result = AggregationResult::default();
    let mut counted: HashSet<String> = HashSet::new();

    for product in products {
        for entry in product.content.iter().filter(|e| e.is_number()) {
            let Some(value) = parse_amount(&entry.value) else {
                warn!(product = %product.id, item = %entry.id, value = %entry.value, "ignoring malformed numeric value");
                continue;
            };

            let key = format!("{}_{}", product.id, entry.id);
            if value <= 0 || counted.contains(&key) {
                debug!(%key, value, "value ignored (non-positive or already counted)");
                continue;
            }

            match result.total_value.checked_add(value) {
                Some(total) => {
                    result.total_value = total;
                    counted.insert(key.clone());
                    result.dedup_keys.push(key);
                }
                None => warn!(%key, value, "ignoring value that would overflow the total"),
            }
        }

        if let Some(code) = &product.content_raw {
            result.codes.push(code.clone());
        }
    }

    result
}

/// Integer value of a numeric content entry.
///
/// Integers and integer strings parse as-is; floats truncate toward zero.
fn parse_amount(value: &Value) -> Option<Balance> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f > i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f.trunc() as Balance)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::ContentEntry;
    use serde_json::json;

    fn number(id: &str, value: Value) -> ContentEntry {
        ContentEntry {
            kind: "number".into(),
            id: id.into(),
            value,
        }
    }

    fn product(id: &str, content: Vec<ContentEntry>, code: Option<&str>) -> DeliveredProduct {
        DeliveredProduct {
            id: id.into(),
            content,
            content_raw: code.map(String::from),
        }
    }

    #[test]
    fn sums_numeric_entries() {
        let products = vec![
            product("A", vec![number("1", json!("50")), number("2", json!(25))], None),
            product("B", vec![number("1", json!("100"))], None),
        ];
        let result = aggregate(&products);
        assert_eq!(result.total_value, 175);
        assert_eq!(result.dedup_keys, vec!["A_1", "A_2", "B_1"]);
    }

    #[test]
    fn repeated_composite_key_counts_once() {
        let products = vec![
            product("A", vec![number("1", json!("50"))], None),
            product("A", vec![number("1", json!("50"))], None),
        ];
        let result = aggregate(&products);
        assert_eq!(result.total_value, 50);
        assert_eq!(result.dedup_keys, vec!["A_1"]);
    }

    #[test]
    fn non_positive_values_contribute_nothing() {
        let products = vec![product(
            "A",
            vec![number("1", json!("-10")), number("2", json!(0))],
            None,
        )];
        let result = aggregate(&products);
        assert_eq!(result.total_value, 0);
        assert!(result.dedup_keys.is_empty());
    }

    #[test]
    fn skipped_key_can_still_count_later() {
        let products = vec![
            product("A", vec![number("1", json!("-5"))], None),
            product("A", vec![number("1", json!("30"))], None),
        ];
        assert_eq!(aggregate(&products).total_value, 30);
    }

    #[test]
    fn malformed_values_are_skipped() {
        let products = vec![product(
            "A",
            vec![
                number("1", json!("abc")),
                number("2", json!(null)),
                number("3", json!(true)),
                number("4", json!("12.5")),
                number("5", json!(7)),
            ],
            None,
        )];
        assert_eq!(aggregate(&products).total_value, 7);
    }

    #[test]
    fn non_number_entries_are_ignored() {
        let text = ContentEntry {
            kind: "text".into(),
            id: "1".into(),
            value: json!("500"),
        };
        let products = vec![product("A", vec![text], None)];
        assert_eq!(aggregate(&products).total_value, 0);
    }

    #[test]
    fn floats_truncate() {
        let products = vec![product("A", vec![number("1", json!(9.9))], None)];
        assert_eq!(aggregate(&products).total_value, 9);
    }

    #[test]
    fn codes_are_collected_in_order() {
        let products = vec![
            product("A", vec![], Some("FIRST")),
            product("B", vec![], None),
            product("C", vec![], Some("SECOND")),
        ];
        assert_eq!(aggregate(&products).codes, vec!["FIRST", "SECOND"]);
    }

    #[test]
    fn overflowing_value_is_skipped() {
        let products = vec![product(
            "A",
            vec![number("1", json!(i64::MAX)), number("2", json!(1))],
            None,
        )];
        let result = aggregate(&products);
        assert_eq!(result.total_value, i64::MAX);
        assert_eq!(result.dedup_keys, vec!["A_1"]);
    }

    #[test]
    fn empty_notification_is_worth_nothing() {
        assert_eq!(aggregate(&[]), AggregationResult::default());
    }
}
